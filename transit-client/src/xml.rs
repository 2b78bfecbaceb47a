//! A minimal attribute-tree view over an XML document, built with `quick-xml`.
//!
//! The upstream feed's responses are shallow (a `<body>` wrapping a flat or
//! two-level list of elements with all the interesting data in attributes),
//! so a full DOM isn't needed — just enough structure to walk direct
//! children by tag name and read attributes, matching how the original
//! Python code used `lxml`'s `findall`/`get`.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use transit_core::{Error, Result};

/// One XML element: its tag, attributes, text content, and direct children.
#[derive(Debug, Clone, Default)]
pub struct Element {
    /// The element's tag name.
    pub tag: String,
    /// Attribute name/value pairs.
    pub attrs: HashMap<String, String>,
    /// Concatenated text content of this element (not its children's).
    pub text: String,
    /// Direct child elements, in document order.
    pub children: Vec<Element>,
}

impl Element {
    /// Read an attribute's value.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// All direct children with the given tag.
    #[must_use]
    pub fn children(&self, tag: &str) -> Vec<&Element> {
        self.children.iter().filter(|c| c.tag == tag).collect()
    }

    /// The first direct child with the given tag, if any.
    #[must_use]
    pub fn child(&self, tag: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.tag == tag)
    }
}

/// Parse an XML document's root element.
pub fn parse(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = vec![Element::default()];
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(element_from_start(&start)?),
            Ok(Event::Empty(start)) => {
                let el = element_from_start(&start)?;
                stack
                    .last_mut()
                    .expect("root sentinel never pops")
                    .children
                    .push(el);
            }
            Ok(Event::Text(text)) => {
                if let Ok(unescaped) = text.unescape() {
                    stack
                        .last_mut()
                        .expect("root sentinel never pops")
                        .text
                        .push_str(&unescaped);
                }
            }
            Ok(Event::End(_))
                if stack.len() > 1 => {
                    let finished = stack.pop().expect("checked len > 1");
                    stack
                        .last_mut()
                        .expect("root sentinel never pops")
                        .children
                        .push(finished);
                }
            Ok(Event::Eof) => break,
            Err(err) => return Err(Error::protocol_violation(format!("unparseable XML: {err}"))),
            _ => {}
        }
    }

    stack
        .pop()
        .and_then(|sentinel| sentinel.children.into_iter().next())
        .ok_or_else(|| Error::protocol_violation("XML document has no root element"))
}

fn element_from_start(start: &quick_xml::events::BytesStart<'_>) -> Result<Element> {
    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = HashMap::new();
    for attr in start.attributes() {
        let attr =
            attr.map_err(|err| Error::protocol_violation(format!("malformed attribute: {err}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map(|v| v.into_owned())
            .unwrap_or_default();
        attrs.insert(key, value);
    }
    Ok(Element {
        tag,
        attrs,
        text: String::new(),
        children: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_attributes() {
        let xml = r#"<body><route tag="38" title="Geary">
            <direction tag="38_0_var0" title="Outbound" />
            <stop tag="4288" title="Geary St" lat="37.787" lon="-122.4" />
        </route></body>"#;
        let body = parse(xml).unwrap();
        assert_eq!(body.tag, "body");
        let route = body.child("route").unwrap();
        assert_eq!(route.attr("tag"), Some("38"));
        assert_eq!(route.children("direction").len(), 1);
        let stop = route.child("stop").unwrap();
        assert_eq!(stop.attr("lat"), Some("37.787"));
    }

    #[test]
    fn captures_error_element_text() {
        let xml = r#"<body><Error shouldRetry="false">Agency not found.</Error></body>"#;
        let body = parse(xml).unwrap();
        let error = body.child("Error").unwrap();
        assert_eq!(error.attr("shouldRetry"), Some("false"));
        assert_eq!(error.text, "Agency not found.");
    }

    #[test]
    fn rejects_malformed_xml() {
        assert!(parse("<body><unterminated></body>").is_err());
    }
}
