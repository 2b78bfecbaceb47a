//! The data model: entities as plain structs keyed by surrogate `i64` ids,
//! with many-to-many relationships (Route<->Stop) expressed as explicit
//! join records (`RouteStop`) rather than back-pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an [`ApiCallLog`] entry's data came from. A closed enum rather than
/// a string column: today there is exactly one upstream feed, but adding a
/// second is a compile-time-visible change, not a silent new string value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiSource {
    /// NextBus's `publicXMLFeed`.
    Nextbus,
}

/// A named geographic area. Created on first reference, never mutated,
/// destroyed only as a side effect of an agency refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Surrogate primary key.
    pub id: i64,
    /// Unique human-readable name.
    pub title: String,
}

/// A transit operator. Bounding-box fields are intentionally absent here:
/// they are a derived projection over the agency's routes (see
/// [`bounding_box_of`]), never authoritative stored state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agency {
    /// Surrogate primary key.
    pub id: i64,
    /// Unique machine name.
    pub tag: String,
    /// Human-readable full name.
    pub title: String,
    /// Shortened name for compact UIs.
    pub short_title: Option<String>,
    /// The region this agency belongs to.
    pub region_id: i64,
    /// The call that most recently wrote this row.
    pub api_call_id: Option<i64>,
}

/// A named transit line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Surrogate primary key.
    pub id: i64,
    /// Owning agency.
    pub agency_id: i64,
    /// Machine name, unique within the agency.
    pub tag: String,
    /// Human-readable name.
    pub title: String,
    /// Shortened name for compact UIs.
    pub short_title: Option<String>,
    /// Hex color used to draw the route.
    pub color: Option<String>,
    /// Hex color that contrasts with `color`.
    pub opposite_color: Option<String>,
    /// Southern extent.
    pub lat_min: Option<f64>,
    /// Northern extent.
    pub lat_max: Option<f64>,
    /// Western extent.
    pub lon_min: Option<f64>,
    /// Eastern extent.
    pub lon_max: Option<f64>,
    /// The call that most recently wrote this row.
    pub api_call_id: Option<i64>,
}

/// A bounding box, used only as a derived projection (never stored).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Southern extent, if any route contributed one.
    pub lat_min: Option<f64>,
    /// Northern extent.
    pub lat_max: Option<f64>,
    /// Western extent.
    pub lon_min: Option<f64>,
    /// Eastern extent.
    pub lon_max: Option<f64>,
}

/// Compute an agency's bounding box as the min/max over its routes.
/// Never persisted; callers recompute it on read.
#[must_use]
pub fn bounding_box_of<'a>(routes: impl IntoIterator<Item = &'a Route>) -> BoundingBox {
    let mut bbox = BoundingBox::default();
    for route in routes {
        merge_bound(&mut bbox.lat_min, route.lat_min, f64::min);
        merge_bound(&mut bbox.lat_max, route.lat_max, f64::max);
        merge_bound(&mut bbox.lon_min, route.lon_min, f64::min);
        merge_bound(&mut bbox.lon_max, route.lon_max, f64::max);
    }
    bbox
}

fn merge_bound(acc: &mut Option<f64>, value: Option<f64>, combine: fn(f64, f64) -> f64) {
    if let Some(v) = value {
        *acc = Some(acc.map_or(v, |existing| combine(existing, v)));
    }
}

/// A route's named operating direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    /// Surrogate primary key.
    pub id: i64,
    /// Owning route.
    pub route_id: i64,
    /// Machine name, unique within the route.
    pub tag: String,
    /// Human-readable name.
    pub title: Option<String>,
    /// A simplified/normalized name; may be shared across directions.
    pub name: Option<String>,
    /// The call that most recently wrote this row.
    pub api_call_id: Option<i64>,
}

/// A physical boarding location, shared across routes and coalesced by
/// title and coordinate proximity (see `transit_client::coalesce`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    /// Surrogate primary key.
    pub id: i64,
    /// Human-readable name; part of the coalescing key.
    pub title: String,
    /// Latitude: the running mean of all contributing samples.
    pub lat: f64,
    /// Longitude: the running mean of all contributing samples.
    pub lon: f64,
    /// Count of samples folded into the running mean so far.
    pub lat_lon_count: u32,
    /// The upstream's own numeric id for this stop, when it supplies one.
    pub stop_id: Option<i64>,
    /// The call that most recently wrote this row.
    pub api_call_id: Option<i64>,
}

/// The association between a [`Route`] and a [`Stop`], carrying the tag the
/// route uses locally to refer to the stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    /// The route side of the association.
    pub route_id: i64,
    /// The stop side of the association.
    pub stop_id: i64,
    /// The route-local tag upstream uses for this stop (not globally unique).
    pub stop_tag: String,
}

/// An arrival-time forecast for a vehicle at a stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Surrogate primary key.
    pub id: i64,
    /// The route this prediction is for.
    pub route_id: i64,
    /// The stop this prediction is for.
    pub stop_id: i64,
    /// The direction, when the upstream tag resolved to a known one.
    pub direction_id: Option<i64>,
    /// The forecast arrival instant.
    pub prediction: DateTime<Utc>,
    /// When the forecast was made.
    pub created: DateTime<Utc>,
    /// Whether this is a departure time rather than an arrival time.
    pub is_departure: bool,
    /// Whether a layover affects this forecast.
    pub has_layover: bool,
    /// The upstream's vehicle identifier (not always numeric).
    pub vehicle: String,
    /// The vehicle's block assignment.
    pub block: Option<String>,
    /// The call that produced this row.
    pub api_call_id: Option<i64>,
}

/// A timestamped GPS sample for a vehicle on a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleLocation {
    /// Surrogate primary key.
    pub id: i64,
    /// The upstream's vehicle identifier (not always numeric).
    pub vehicle: String,
    /// The route this vehicle is serving.
    pub route_id: i64,
    /// The direction, when the upstream tag resolved to a known one.
    pub direction_id: Option<i64>,
    /// Latitude of the sample.
    pub lat: f64,
    /// Longitude of the sample.
    pub lon: f64,
    /// When the sample was recorded.
    pub time: DateTime<Utc>,
    /// Whether the upstream currently considers this vehicle predictable.
    pub predictable: bool,
    /// Heading in degrees [0, 359], or `None` (upstream reports -1 for unknown).
    pub heading: Option<u16>,
    /// Speed in km/h.
    pub speed: f64,
    /// The call that produced this row.
    pub api_call_id: Option<i64>,
}

/// One record per upstream call: provenance for every other entity, and the
/// input to [`transit_middleware`]'s quota accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallLog {
    /// Surrogate primary key.
    pub id: i64,
    /// The upstream URL, when a request was actually sent.
    pub url: Option<String>,
    /// The query parameters sent, as JSON (multi-valued params become arrays).
    pub params: serde_json::Value,
    /// Response body size in bytes: `Some(0)` on a network failure, `None`
    /// only if a 200 response genuinely omitted a content-length.
    pub size: Option<u64>,
    /// HTTP status code, or 0 if no response was received.
    pub status: u16,
    /// Any error text the upstream or transport layer reported.
    pub error: Option<String>,
    /// Which upstream this call went to.
    pub source: ApiSource,
    /// When the call was made.
    pub time: DateTime<Utc>,
}

/// Fields needed to log a call before it has a surrogate id.
#[derive(Debug, Clone)]
pub struct NewApiCall {
    /// The upstream URL, when a request was actually sent.
    pub url: Option<String>,
    /// The query parameters sent, as JSON.
    pub params: serde_json::Value,
    /// Response body size in bytes.
    pub size: Option<u64>,
    /// HTTP status code, or 0 if no response was received.
    pub status: u16,
    /// Any error text the upstream or transport layer reported.
    pub error: Option<String>,
    /// Which upstream this call went to.
    pub source: ApiSource,
}

/// Fields needed to upsert an [`Agency`] (and its [`Region`]) before either
/// has a surrogate id.
#[derive(Debug, Clone)]
pub struct NewAgency {
    /// Unique machine name.
    pub tag: String,
    /// Human-readable full name.
    pub title: String,
    /// Shortened name for compact UIs.
    pub short_title: Option<String>,
    /// The region's title; the region is created on first reference.
    pub region_title: String,
    /// The call that produced this row.
    pub api_call_id: Option<i64>,
}

/// Fields needed to insert a [`Direction`] before it has a surrogate id.
#[derive(Debug, Clone)]
pub struct NewDirection {
    /// Machine name, unique within the route.
    pub tag: String,
    /// Human-readable name.
    pub title: Option<String>,
    /// A simplified/normalized name.
    pub name: Option<String>,
    /// The call that produced this row.
    pub api_call_id: Option<i64>,
}

/// A candidate stop observation, fed into `get_or_create_stop`'s streaming
/// mean (see `transit_client::coalesce`).
#[derive(Debug, Clone)]
pub struct StopCandidate {
    /// Human-readable name; part of the coalescing key.
    pub title: String,
    /// Observed latitude.
    pub lat: f64,
    /// Observed longitude.
    pub lon: f64,
    /// The upstream's own numeric id for this stop, when supplied.
    pub stop_id: Option<i64>,
    /// The route-local tag upstream uses for this stop.
    pub stop_tag: String,
    /// The call that produced this observation.
    pub api_call_id: Option<i64>,
}

/// A fully-populated route plus its directions and route-stop associations,
/// as needed to build the `(agency_tag, route_tag) -> Route` and
/// `stop_tag -> Stop` maps that predictions/vehicle-location ingestion rely
/// on (see spec §4.6).
#[derive(Debug, Clone)]
pub struct NewRoute {
    /// Machine name, unique within the agency.
    pub tag: String,
    /// Human-readable name.
    pub title: String,
    /// Shortened name for compact UIs.
    pub short_title: Option<String>,
    /// Hex color used to draw the route.
    pub color: Option<String>,
    /// Hex color that contrasts with `color`.
    pub opposite_color: Option<String>,
    /// Southern extent, as reported by upstream for this route.
    pub lat_min: Option<f64>,
    /// Northern extent.
    pub lat_max: Option<f64>,
    /// Western extent.
    pub lon_min: Option<f64>,
    /// Eastern extent.
    pub lon_max: Option<f64>,
    /// The call that produced this row.
    pub api_call_id: Option<i64>,
    /// Directions to create alongside the route.
    pub directions: Vec<NewDirection>,
    /// Stops to coalesce-or-create and associate with the route, carrying
    /// each stop's route-local tag.
    pub stops: Vec<StopCandidate>,
}

/// A [`Route`] joined with the data ingestion tasks need to resolve upstream
/// tags: its directions and its `stop_tag -> Stop` associations.
#[derive(Debug, Clone)]
pub struct RouteWithDetails {
    /// The route itself.
    pub route: Route,
    /// The route's directions.
    pub directions: Vec<Direction>,
    /// The route's stop associations, each carrying its local stop tag.
    pub route_stops: Vec<RouteStop>,
}

impl RouteWithDetails {
    /// Resolve a route-local stop tag to the globally-shared stop id.
    #[must_use]
    pub fn stop_id_for_tag(&self, stop_tag: &str) -> Option<i64> {
        self.route_stops
            .iter()
            .find(|rs| rs.stop_tag == stop_tag)
            .map(|rs| rs.stop_id)
    }

    /// Resolve an upstream direction tag to a known direction id, or `None`
    /// if the upstream gave an invalid tag (silently tolerated per spec §4.6).
    #[must_use]
    pub fn direction_id_for_tag(&self, dir_tag: &str) -> Option<i64> {
        self.directions
            .iter()
            .find(|d| d.tag == dir_tag)
            .map(|d| d.id)
    }
}

/// Fields needed to insert a [`Prediction`] before it has a surrogate id.
#[derive(Debug, Clone)]
pub struct NewPrediction {
    /// The route this prediction is for.
    pub route_id: i64,
    /// The stop this prediction is for.
    pub stop_id: i64,
    /// The direction, when the upstream tag resolved to a known one.
    pub direction_id: Option<i64>,
    /// The forecast arrival instant.
    pub prediction: DateTime<Utc>,
    /// Whether this is a departure time rather than an arrival time.
    pub is_departure: bool,
    /// Whether a layover affects this forecast.
    pub has_layover: bool,
    /// The upstream's vehicle identifier.
    pub vehicle: String,
    /// The vehicle's block assignment.
    pub block: Option<String>,
    /// The call that produced this row.
    pub api_call_id: Option<i64>,
}

/// Fields needed to insert a [`VehicleLocation`] before it has a surrogate id.
#[derive(Debug, Clone)]
pub struct NewVehicleLocation {
    /// The upstream's vehicle identifier.
    pub vehicle: String,
    /// The route this vehicle is serving.
    pub route_id: i64,
    /// The direction, when the upstream tag resolved to a known one.
    pub direction_id: Option<i64>,
    /// Latitude of the sample.
    pub lat: f64,
    /// Longitude of the sample.
    pub lon: f64,
    /// When the sample was recorded.
    pub time: DateTime<Utc>,
    /// Whether the upstream currently considers this vehicle predictable.
    pub predictable: bool,
    /// Heading in degrees [0, 359], or `None`.
    pub heading: Option<u16>,
    /// Speed in km/h.
    pub speed: f64,
    /// The call that produced this row.
    pub api_call_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Route {
        Route {
            id: 1,
            agency_id: 1,
            tag: "1".into(),
            title: "One".into(),
            short_title: None,
            color: None,
            opposite_color: None,
            lat_min: Some(lat_min),
            lat_max: Some(lat_max),
            lon_min: Some(lon_min),
            lon_max: Some(lon_max),
            api_call_id: None,
        }
    }

    #[test]
    fn bounding_box_is_min_max_over_routes() {
        let routes = [route(10.0, 20.0, -5.0, 5.0), route(12.0, 25.0, -8.0, 3.0)];
        let bbox = bounding_box_of(&routes);
        assert_eq!(bbox.lat_min, Some(10.0));
        assert_eq!(bbox.lat_max, Some(25.0));
        assert_eq!(bbox.lon_min, Some(-8.0));
        assert_eq!(bbox.lon_max, Some(5.0));
    }

    #[test]
    fn bounding_box_of_no_routes_is_all_none() {
        let routes: Vec<Route> = Vec::new();
        let bbox = bounding_box_of(&routes);
        assert_eq!(bbox, BoundingBox::default());
    }
}
