//! Upstream XML attribute to typed-field mapping (spec's Normalizer).
//!
//! Every function here reads raw attribute strings off an [`Element`] and
//! returns a small, upstream-shaped intermediate record — floats parsed,
//! booleans coerced from `"true"`/`"false"`, camelCase attribute names
//! translated to the field names the rest of the system uses. These records
//! still carry upstream tags (`route_tag`, `dir_tag`, ...) rather than
//! surrogate ids: resolving tags to ids needs a `Store` lookup, which is the
//! ingestion tasks' job, not the normalizer's.

use chrono::{DateTime, Utc};
use transit_core::{Error, Result};

use crate::xml::Element;

fn attr<'a>(el: &'a Element, name: &str) -> Result<&'a str> {
    el.attr(name)
        .ok_or_else(|| Error::protocol_violation(format!("<{}> is missing '{name}'", el.tag)))
}

fn attr_opt<'a>(el: &'a Element, name: &str) -> Option<&'a str> {
    el.attr(name).filter(|v| !v.is_empty())
}

fn attr_f64(el: &Element, name: &str) -> Result<f64> {
    attr(el, name)?
        .parse()
        .map_err(|_| Error::protocol_violation(format!("<{}>'s '{name}' is not a number", el.tag)))
}

fn attr_opt_f64(el: &Element, name: &str) -> Option<f64> {
    attr_opt(el, name).and_then(|v| v.parse().ok())
}

fn attr_i64(el: &Element, name: &str) -> Result<i64> {
    attr(el, name)?
        .parse()
        .map_err(|_| Error::protocol_violation(format!("<{}>'s '{name}' is not an integer", el.tag)))
}

fn attr_bool(el: &Element, name: &str) -> bool {
    attr_opt(el, name).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// An agency, keyed by `tag`, carrying its region by title (created on first
/// reference — see `transit_core::Region`).
#[derive(Debug, Clone)]
pub struct ParsedAgency {
    /// Unique machine name.
    pub tag: String,
    /// Human-readable full name.
    pub title: String,
    /// Shortened name for compact UIs.
    pub short_title: Option<String>,
    /// The region's title.
    pub region_title: String,
}

/// Parse an `<agency>` element from `agencyList`.
pub fn parse_agency(el: &Element) -> Result<ParsedAgency> {
    Ok(ParsedAgency {
        tag: attr(el, "tag")?.to_string(),
        title: attr(el, "title")?.to_string(),
        short_title: attr_opt(el, "shortTitle").map(str::to_string),
        region_title: attr(el, "regionTitle")?.to_string(),
    })
}

/// A route's named operating direction.
#[derive(Debug, Clone)]
pub struct ParsedDirection {
    /// Machine name, unique within the route.
    pub tag: String,
    /// Human-readable name.
    pub title: Option<String>,
    /// A simplified/normalized name.
    pub name: Option<String>,
}

fn parse_direction(el: &Element) -> Result<ParsedDirection> {
    Ok(ParsedDirection {
        tag: attr(el, "tag")?.to_string(),
        title: attr_opt(el, "title").map(str::to_string),
        name: attr_opt(el, "name").map(str::to_string),
    })
}

/// A stop observation as reported for one route, still carrying the
/// route-local tag upstream uses to refer to it.
#[derive(Debug, Clone)]
pub struct ParsedStop {
    /// The route-local tag upstream uses for this stop.
    pub stop_tag: String,
    /// Human-readable name; part of the coalescing key.
    pub title: String,
    /// Observed latitude.
    pub lat: f64,
    /// Observed longitude.
    pub lon: f64,
    /// The upstream's own numeric id for this stop, when supplied.
    pub stop_id: Option<i64>,
}

fn parse_stop(el: &Element) -> Result<ParsedStop> {
    Ok(ParsedStop {
        stop_tag: attr(el, "tag")?.to_string(),
        title: attr(el, "title")?.to_string(),
        lat: attr_f64(el, "lat")?,
        lon: attr_f64(el, "lon")?,
        stop_id: attr_opt(el, "stopId").and_then(|v| v.parse().ok()),
    })
}

/// A route from `routeConfig`, with its directions and stops already parsed.
#[derive(Debug, Clone)]
pub struct ParsedRoute {
    /// Machine name, unique within the agency.
    pub tag: String,
    /// Human-readable name.
    pub title: String,
    /// Hex color used to draw the route.
    pub color: Option<String>,
    /// Hex color that contrasts with `color`.
    pub opposite_color: Option<String>,
    /// Southern extent, as reported by upstream.
    pub lat_min: Option<f64>,
    /// Northern extent.
    pub lat_max: Option<f64>,
    /// Western extent.
    pub lon_min: Option<f64>,
    /// Eastern extent.
    pub lon_max: Option<f64>,
    /// This route's directions.
    pub directions: Vec<ParsedDirection>,
    /// This route's stops, each carrying the tag the route uses for it.
    pub stops: Vec<ParsedStop>,
}

/// Parse a `<route>` element from `routeConfig` (its nested `<direction>`
/// and `<stop>` children included).
pub fn parse_route(el: &Element) -> Result<ParsedRoute> {
    let directions = el
        .children("direction")
        .into_iter()
        .map(parse_direction)
        .collect::<Result<Vec<_>>>()?;
    let stops = el
        .children("stop")
        .into_iter()
        .map(parse_stop)
        .collect::<Result<Vec<_>>>()?;
    Ok(ParsedRoute {
        tag: attr(el, "tag")?.to_string(),
        title: attr(el, "title")?.to_string(),
        color: attr_opt(el, "color").map(str::to_string),
        opposite_color: attr_opt(el, "oppositeColor").map(str::to_string),
        lat_min: attr_opt_f64(el, "latMin"),
        lat_max: attr_opt_f64(el, "latMax"),
        lon_min: attr_opt_f64(el, "lonMin"),
        lon_max: attr_opt_f64(el, "lonMax"),
        directions,
        stops,
    })
}

/// One arrival/departure forecast within a `<predictions>` set.
#[derive(Debug, Clone)]
pub struct ParsedPrediction {
    /// The upstream's direction tag, if it supplied one.
    pub dir_tag: Option<String>,
    /// The forecast arrival instant, converted from `epochTime` millis.
    pub prediction: DateTime<Utc>,
    /// Whether this is a departure time rather than an arrival time.
    pub is_departure: bool,
    /// Whether a layover affects this forecast.
    pub has_layover: bool,
    /// The upstream's vehicle identifier.
    pub vehicle: String,
    /// The vehicle's block assignment.
    pub block: Option<String>,
}

/// All predictions upstream returned for one `routeTag`/`stopTag` pair.
#[derive(Debug, Clone)]
pub struct ParsedPredictionSet {
    /// The route-local tag the request was made under.
    pub route_tag: String,
    /// The stop the predictions are for.
    pub stop_tag: String,
    /// The individual forecasts, across all of upstream's `<direction>` groupings.
    pub predictions: Vec<ParsedPrediction>,
}

/// Parse a `<predictions>` element from `predictionsForMultiStops`.
pub fn parse_prediction_set(el: &Element) -> Result<ParsedPredictionSet> {
    let route_tag = attr(el, "routeTag")?.to_string();
    let stop_tag = attr(el, "stopTag")?.to_string();
    let mut predictions = Vec::new();
    for direction in el.children("direction") {
        for p in direction.children("prediction") {
            let epoch_ms = attr_i64(p, "epochTime")?;
            let prediction = DateTime::<Utc>::from_timestamp_millis(epoch_ms)
                .ok_or_else(|| Error::protocol_violation("epochTime out of representable range"))?;
            predictions.push(ParsedPrediction {
                dir_tag: attr_opt(p, "dirTag").map(str::to_string),
                prediction,
                is_departure: attr_bool(p, "isDeparture"),
                has_layover: attr_bool(p, "affectedByLayover"),
                vehicle: attr(p, "vehicle")?.to_string(),
                block: attr_opt(p, "block").map(str::to_string),
            });
        }
    }
    Ok(ParsedPredictionSet {
        route_tag,
        stop_tag,
        predictions,
    })
}

/// A GPS sample from a `vehicleLocations` response.
#[derive(Debug, Clone)]
pub struct ParsedVehicle {
    /// The upstream's vehicle identifier.
    pub vehicle: String,
    /// The route tag upstream reports the vehicle on, if any.
    pub route_tag: Option<String>,
    /// The direction tag, if upstream supplied one.
    pub dir_tag: Option<String>,
    /// Latitude of the sample.
    pub lat: f64,
    /// Longitude of the sample.
    pub lon: f64,
    /// How many seconds old this report was when it was captured.
    pub secs_since_report: i64,
    /// Whether upstream currently considers this vehicle predictable.
    pub predictable: bool,
    /// Heading in degrees, or `None` for upstream's -1 ("unknown") sentinel.
    pub heading: Option<u16>,
    /// Speed in km/h.
    pub speed_km_hr: f64,
}

/// Parse a `<vehicle>` element from `vehicleLocations`.
pub fn parse_vehicle(el: &Element) -> Result<ParsedVehicle> {
    let heading_raw = attr_i64(el, "heading")?;
    Ok(ParsedVehicle {
        vehicle: attr(el, "id")?.to_string(),
        route_tag: attr_opt(el, "routeTag").map(str::to_string),
        dir_tag: attr_opt(el, "dirTag").map(str::to_string),
        lat: attr_f64(el, "lat")?,
        lon: attr_f64(el, "lon")?,
        secs_since_report: attr_i64(el, "secsSinceReport")?,
        predictable: attr_bool(el, "predictable"),
        heading: u16::try_from(heading_raw).ok(),
        speed_km_hr: attr_f64(el, "speedKmHr")?,
    })
}
