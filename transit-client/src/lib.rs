//! transit-client
//!
//! The upstream NextBus feed's HTTP client and XML normalizer.
//!
//! - `client`: [`UpstreamClient`], the single/batch request interface.
//! - `xml`: a minimal attribute-tree view over an XML document.
//! - `normalize`: attribute-to-typed-field mapping for each upstream element.
#![warn(missing_docs)]

/// HTTP client for the upstream feed.
pub mod client;
/// Upstream attribute to typed-field mapping.
pub mod normalize;
/// Minimal XML element tree.
pub mod xml;

pub use client::{Params, UpstreamClient};
pub use xml::Element;
