//! An in-process [`Store`] implementation backed by a single
//! `tokio::sync::RwLock` over plain vectors. The reference/test
//! implementation the system's scope boundary permits in place of a real
//! SQL-speaking collaborator (see `DESIGN.md`).

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use transit_core::{
    Agency, ApiCallLog, Direction, NewAgency, NewApiCall, NewPrediction, NewRoute,
    NewVehicleLocation, Prediction, Region, Result, Route, RouteStop, RouteWithDetails, Stop,
    StopCandidate, Store, VehicleLocation,
};

use crate::coalesce::{self, CoalesceOutcome};

/// Default stop-coalescing tolerances, in degrees.
pub const DEFAULT_SAME_STOP_LAT: f64 = 0.005;
/// Default stop-coalescing tolerance for longitude, in degrees.
pub const DEFAULT_SAME_STOP_LON: f64 = 0.005;

#[derive(Default)]
struct Ids {
    region: i64,
    agency: i64,
    route: i64,
    direction: i64,
    stop: i64,
    prediction: i64,
    vehicle_location: i64,
    api_call: i64,
}

impl Ids {
    fn next(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }
}

#[derive(Default)]
struct State {
    ids: Ids,
    regions: Vec<Region>,
    agencies: Vec<Agency>,
    routes: Vec<Route>,
    directions: Vec<Direction>,
    stops: Vec<Stop>,
    route_stops: Vec<RouteStop>,
    predictions: Vec<Prediction>,
    vehicle_locations: Vec<VehicleLocation>,
    api_calls: Vec<ApiCallLog>,
}

/// The in-memory reference `Store`.
pub struct MemoryStore {
    same_stop_lat: f64,
    same_stop_lon: f64,
    state: RwLock<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Build an empty store with the default coalescing tolerances.
    #[must_use]
    pub fn new() -> Self {
        Self {
            same_stop_lat: DEFAULT_SAME_STOP_LAT,
            same_stop_lon: DEFAULT_SAME_STOP_LON,
            state: RwLock::new(State::default()),
        }
    }

    /// Override the stop-coalescing tolerances (`SAME_STOP_LAT`/`SAME_STOP_LON`).
    #[must_use]
    pub fn with_same_stop_tolerance(mut self, lat: f64, lon: f64) -> Self {
        self.same_stop_lat = lat;
        self.same_stop_lon = lon;
        self
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn insert_api_call(&self, call: NewApiCall) -> Result<ApiCallLog> {
        let mut state = self.state.write().await;
        let id = Ids::next(&mut state.ids.api_call);
        let row = ApiCallLog {
            id,
            url: call.url,
            params: call.params,
            size: call.size,
            status: call.status,
            error: call.error,
            source: call.source,
            time: Utc::now(),
        };
        state.api_calls.push(row.clone());
        Ok(row)
    }

    async fn bytes_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .api_calls
            .iter()
            .filter(|call| call.time >= since)
            .filter_map(|call| call.size)
            .sum())
    }

    async fn replace_agencies(&self, truncate: bool, agencies: Vec<NewAgency>) -> Result<Vec<Agency>> {
        let mut state = self.state.write().await;
        if truncate {
            let stale_route_ids: Vec<i64> = state.routes.iter().map(|r| r.id).collect();
            state.agencies.clear();
            state.routes.clear();
            state.directions.clear();
            state.route_stops.clear();
            state
                .vehicle_locations
                .retain(|v| !stale_route_ids.contains(&v.route_id));
        }
        let mut result = Vec::with_capacity(agencies.len());
        for new_agency in agencies {
            let region_id = match state
                .regions
                .iter()
                .find(|r| r.title == new_agency.region_title)
            {
                Some(region) => region.id,
                None => {
                    let id = Ids::next(&mut state.ids.region);
                    state.regions.push(Region {
                        id,
                        title: new_agency.region_title.clone(),
                    });
                    id
                }
            };
            let existing_index = state.agencies.iter().position(|a| a.tag == new_agency.tag);
            let agency = match existing_index {
                Some(index) => {
                    let agency = &mut state.agencies[index];
                    agency.title = new_agency.title;
                    agency.short_title = new_agency.short_title;
                    agency.region_id = region_id;
                    agency.api_call_id = new_agency.api_call_id;
                    agency.clone()
                }
                None => {
                    let id = Ids::next(&mut state.ids.agency);
                    let agency = Agency {
                        id,
                        tag: new_agency.tag,
                        title: new_agency.title,
                        short_title: new_agency.short_title,
                        region_id,
                        api_call_id: new_agency.api_call_id,
                    };
                    state.agencies.push(agency.clone());
                    agency
                }
            };
            result.push(agency);
        }
        Ok(result)
    }

    async fn agencies(&self) -> Result<Vec<Agency>> {
        Ok(self.state.read().await.agencies.clone())
    }

    async fn find_region(&self, title: &str) -> Result<Option<Region>> {
        Ok(self
            .state
            .read()
            .await
            .regions
            .iter()
            .find(|r| r.title == title)
            .cloned())
    }

    async fn replace_routes_for_agency(
        &self,
        agency_tag: &str,
        truncate: bool,
        routes: Vec<NewRoute>,
    ) -> Result<Vec<RouteWithDetails>> {
        let mut state = self.state.write().await;
        let agency_id = state
            .agencies
            .iter()
            .find(|a| a.tag == agency_tag)
            .map(|a| a.id)
            .ok_or_else(|| transit_core::Error::store(format!("unknown agency tag '{agency_tag}'")))?;

        if truncate {
            let stale_route_ids: Vec<i64> = state
                .routes
                .iter()
                .filter(|r| r.agency_id == agency_id)
                .map(|r| r.id)
                .collect();
            state.routes.retain(|r| r.agency_id != agency_id);
            state
                .directions
                .retain(|d| !stale_route_ids.contains(&d.route_id));
            state
                .route_stops
                .retain(|rs| !stale_route_ids.contains(&rs.route_id));
            state
                .vehicle_locations
                .retain(|v| !stale_route_ids.contains(&v.route_id));
        }

        let mut result = Vec::with_capacity(routes.len());
        for new_route in routes {
            let existing_index = state
                .routes
                .iter()
                .position(|r| r.agency_id == agency_id && r.tag == new_route.tag);
            let route = match existing_index {
                Some(index) => {
                    let route = &mut state.routes[index];
                    route.title = new_route.title;
                    route.short_title = new_route.short_title;
                    route.color = new_route.color;
                    route.opposite_color = new_route.opposite_color;
                    route.lat_min = new_route.lat_min;
                    route.lat_max = new_route.lat_max;
                    route.lon_min = new_route.lon_min;
                    route.lon_max = new_route.lon_max;
                    route.api_call_id = new_route.api_call_id;
                    route.clone()
                }
                None => {
                    let id = Ids::next(&mut state.ids.route);
                    let route = Route {
                        id,
                        agency_id,
                        tag: new_route.tag,
                        title: new_route.title,
                        short_title: new_route.short_title,
                        color: new_route.color,
                        opposite_color: new_route.opposite_color,
                        lat_min: new_route.lat_min,
                        lat_max: new_route.lat_max,
                        lon_min: new_route.lon_min,
                        lon_max: new_route.lon_max,
                        api_call_id: new_route.api_call_id,
                    };
                    state.routes.push(route.clone());
                    route
                }
            };

            let mut directions = Vec::with_capacity(new_route.directions.len());
            for new_direction in new_route.directions {
                let existing = state
                    .directions
                    .iter()
                    .position(|d| d.route_id == route.id && d.tag == new_direction.tag);
                let direction = match existing {
                    Some(index) => {
                        let direction = &mut state.directions[index];
                        direction.title = new_direction.title;
                        direction.name = new_direction.name;
                        direction.api_call_id = new_direction.api_call_id;
                        direction.clone()
                    }
                    None => {
                        let id = Ids::next(&mut state.ids.direction);
                        let direction = Direction {
                            id,
                            route_id: route.id,
                            tag: new_direction.tag,
                            title: new_direction.title,
                            name: new_direction.name,
                            api_call_id: new_direction.api_call_id,
                        };
                        state.directions.push(direction.clone());
                        direction
                    }
                };
                directions.push(direction);
            }

            let mut route_stops = Vec::with_capacity(new_route.stops.len());
            for candidate in new_route.stops {
                let stop_tag = candidate.stop_tag.clone();
                let stop = coalesce_stop(&mut state, candidate, self.same_stop_lat, self.same_stop_lon);
                let existing = state
                    .route_stops
                    .iter()
                    .position(|rs| rs.route_id == route.id && rs.stop_id == stop.id);
                let route_stop = match existing {
                    Some(index) => {
                        state.route_stops[index].stop_tag = stop_tag.clone();
                        state.route_stops[index].clone()
                    }
                    None => {
                        let route_stop = RouteStop {
                            route_id: route.id,
                            stop_id: stop.id,
                            stop_tag: stop_tag.clone(),
                        };
                        state.route_stops.push(route_stop.clone());
                        route_stop
                    }
                };
                route_stops.push(route_stop);
            }

            result.push(RouteWithDetails {
                route,
                directions,
                route_stops,
            });
        }
        Ok(result)
    }

    async fn routes_by_tag(&self, keys: &[(String, String)]) -> Result<Vec<RouteWithDetails>> {
        let state = self.state.read().await;
        let mut result = Vec::new();
        for (agency_tag, route_tag) in keys {
            let Some(agency) = state.agencies.iter().find(|a| &a.tag == agency_tag) else {
                continue;
            };
            let Some(route) = state
                .routes
                .iter()
                .find(|r| r.agency_id == agency.id && &r.tag == route_tag)
            else {
                continue;
            };
            let directions = state
                .directions
                .iter()
                .filter(|d| d.route_id == route.id)
                .cloned()
                .collect();
            let route_stops = state
                .route_stops
                .iter()
                .filter(|rs| rs.route_id == route.id)
                .cloned()
                .collect();
            result.push(RouteWithDetails {
                route: route.clone(),
                directions,
                route_stops,
            });
        }
        Ok(result)
    }

    async fn get_or_create_stop(&self, _route_id: i64, candidate: StopCandidate) -> Result<Stop> {
        let mut state = self.state.write().await;
        Ok(coalesce_stop(&mut state, candidate, self.same_stop_lat, self.same_stop_lon))
    }

    async fn delete_predictions_for_routes(&self, route_ids: &[i64]) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.predictions.len();
        state
            .predictions
            .retain(|p| !route_ids.contains(&p.route_id));
        Ok((before - state.predictions.len()) as u64)
    }

    async fn insert_predictions(&self, predictions: Vec<NewPrediction>) -> Result<u64> {
        let mut state = self.state.write().await;
        let count = predictions.len() as u64;
        let now = Utc::now();
        for new_prediction in predictions {
            let id = Ids::next(&mut state.ids.prediction);
            state.predictions.push(Prediction {
                id,
                route_id: new_prediction.route_id,
                stop_id: new_prediction.stop_id,
                direction_id: new_prediction.direction_id,
                prediction: new_prediction.prediction,
                created: now,
                is_departure: new_prediction.is_departure,
                has_layover: new_prediction.has_layover,
                vehicle: new_prediction.vehicle,
                block: new_prediction.block,
                api_call_id: new_prediction.api_call_id,
            });
        }
        Ok(count)
    }

    async fn latest_vehicle_location_time(&self, route_id: i64) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.read().await;
        Ok(state
            .vehicle_locations
            .iter()
            .filter(|v| v.route_id == route_id)
            .map(|v| v.time)
            .max())
    }

    async fn insert_vehicle_locations(&self, locations: Vec<NewVehicleLocation>) -> Result<u64> {
        let mut state = self.state.write().await;
        let count = locations.len() as u64;
        for new_location in locations {
            let id = Ids::next(&mut state.ids.vehicle_location);
            state.vehicle_locations.push(VehicleLocation {
                id,
                vehicle: new_location.vehicle,
                route_id: new_location.route_id,
                direction_id: new_location.direction_id,
                lat: new_location.lat,
                lon: new_location.lon,
                time: new_location.time,
                predictable: new_location.predictable,
                heading: new_location.heading,
                speed: new_location.speed,
                api_call_id: new_location.api_call_id,
            });
        }
        Ok(count)
    }

    async fn evict_predictions_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.predictions.len();
        state.predictions.retain(|p| p.created >= cutoff);
        Ok((before - state.predictions.len()) as u64)
    }

    async fn evict_vehicle_locations_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.vehicle_locations.len();
        state.vehicle_locations.retain(|v| v.time >= cutoff);
        Ok((before - state.vehicle_locations.len()) as u64)
    }

    async fn routes_for_agency(&self, agency_id: i64) -> Result<Vec<Route>> {
        Ok(self
            .state
            .read()
            .await
            .routes
            .iter()
            .filter(|r| r.agency_id == agency_id)
            .cloned()
            .collect())
    }

    async fn all_predictions(&self) -> Result<Vec<Prediction>> {
        Ok(self.state.read().await.predictions.clone())
    }

    async fn all_vehicle_locations(&self) -> Result<Vec<VehicleLocation>> {
        Ok(self.state.read().await.vehicle_locations.clone())
    }
}

/// Apply the coalescing decision in place, returning the resulting stop.
/// Separated from the trait method so `replace_routes_for_agency` can call
/// it while already holding the write lock.
fn coalesce_stop(state: &mut State, candidate: StopCandidate, same_stop_lat: f64, same_stop_lon: f64) -> Stop {
    let same_title: Vec<&Stop> = state
        .stops
        .iter()
        .filter(|s| s.title == candidate.title)
        .collect();
    let outcome = coalesce::decide(&same_title, &candidate, same_stop_lat, same_stop_lon);
    match outcome {
        CoalesceOutcome::UpdateSurvivor {
            id,
            lat,
            lon,
            lat_lon_count,
        } => {
            let stop = state.stops.iter_mut().find(|s| s.id == id).expect("survivor id exists");
            stop.lat = lat;
            stop.lon = lon;
            stop.lat_lon_count = lat_lon_count;
            if candidate.stop_id.is_some() {
                stop.stop_id = candidate.stop_id;
            }
            stop.api_call_id = candidate.api_call_id;
            stop.clone()
        }
        CoalesceOutcome::CreateNew => {
            let id = Ids::next(&mut state.ids.stop);
            let stop = Stop {
                id,
                title: candidate.title,
                lat: candidate.lat,
                lon: candidate.lon,
                lat_lon_count: 1,
                stop_id: candidate.stop_id,
                api_call_id: candidate.api_call_id,
            };
            state.stops.push(stop.clone());
            stop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit_core::{ApiSource, NewDirection};

    fn stop_candidate(title: &str, lat: f64, lon: f64, stop_tag: &str) -> StopCandidate {
        StopCandidate {
            title: title.to_string(),
            lat,
            lon,
            stop_id: None,
            stop_tag: stop_tag.to_string(),
            api_call_id: None,
        }
    }

    #[tokio::test]
    async fn repeated_stop_observations_fold_into_one_survivor() {
        let store = MemoryStore::new();
        let first = store
            .get_or_create_stop(1, stop_candidate("Main & 1st", 40.00000, -74.00000, "4288"))
            .await
            .unwrap();
        let second = store
            .get_or_create_stop(1, stop_candidate("Main & 1st", 40.00200, -74.00200, "4288"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.lat, 40.00100);
        assert_eq!(second.lon, -74.00100);
        assert_eq!(second.lat_lon_count, 2);
        assert_eq!(store.state.read().await.stops.len(), 1);
    }

    #[tokio::test]
    async fn tighter_tolerance_stops_coalescing_observations_the_default_would_fold() {
        let store = MemoryStore::new().with_same_stop_tolerance(0.0001, 0.0001);
        let first = store
            .get_or_create_stop(1, stop_candidate("Main & 1st", 40.00000, -74.00000, "4288"))
            .await
            .unwrap();
        let second = store
            .get_or_create_stop(1, stop_candidate("Main & 1st", 40.00200, -74.00200, "4288"))
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(store.state.read().await.stops.len(), 2);
    }

    #[tokio::test]
    async fn distinct_titles_never_coalesce() {
        let store = MemoryStore::new();
        store
            .get_or_create_stop(1, stop_candidate("Main & 1st", 40.0, -74.0, "a"))
            .await
            .unwrap();
        store
            .get_or_create_stop(1, stop_candidate("2nd & Oak", 40.0, -74.0, "b"))
            .await
            .unwrap();
        assert_eq!(store.state.read().await.stops.len(), 2);
    }

    #[tokio::test]
    async fn bytes_since_sums_only_the_window() {
        let store = MemoryStore::new();
        let old_time = Utc::now() - chrono::Duration::seconds(120);
        store.insert_api_call(new_call(1024)).await.unwrap();
        {
            let mut state = store.state.write().await;
            state.api_calls[0].time = old_time;
        }
        store.insert_api_call(new_call(2048)).await.unwrap();
        let since = Utc::now() - chrono::Duration::seconds(60);
        assert_eq!(store.bytes_since(since).await.unwrap(), 2048);
    }

    fn new_call(size: u64) -> NewApiCall {
        NewApiCall {
            url: Some("http://example.test".to_string()),
            params: serde_json::json!({}),
            size: Some(size),
            status: 200,
            error: None,
            source: ApiSource::Nextbus,
        }
    }

    #[tokio::test]
    async fn agency_truncate_cascades_routes_but_not_stops() {
        let store = MemoryStore::new();
        store
            .replace_agencies(
                true,
                vec![NewAgency {
                    tag: "sf-muni".to_string(),
                    title: "San Francisco Muni".to_string(),
                    short_title: None,
                    region_title: "California-Northern".to_string(),
                    api_call_id: None,
                }],
            )
            .await
            .unwrap();
        store
            .replace_routes_for_agency(
                "sf-muni",
                true,
                vec![NewRoute {
                    tag: "38".to_string(),
                    title: "Geary".to_string(),
                    short_title: None,
                    color: None,
                    opposite_color: None,
                    lat_min: None,
                    lat_max: None,
                    lon_min: None,
                    lon_max: None,
                    api_call_id: None,
                    directions: vec![NewDirection {
                        tag: "38_0_var0".to_string(),
                        title: Some("Outbound".to_string()),
                        name: None,
                        api_call_id: None,
                    }],
                    stops: vec![stop_candidate("Geary & Masonic", 37.78, -122.45, "4288")],
                }],
            )
            .await
            .unwrap();
        assert_eq!(store.state.read().await.routes.len(), 1);
        assert_eq!(store.state.read().await.stops.len(), 1);

        let route_id = store.state.read().await.routes[0].id;
        store
            .insert_vehicle_locations(vec![NewVehicleLocation {
                vehicle: "1234".to_string(),
                route_id,
                direction_id: None,
                lat: 37.78,
                lon: -122.45,
                time: Utc::now(),
                predictable: true,
                heading: None,
                speed: 0.0,
                api_call_id: None,
            }])
            .await
            .unwrap();
        assert_eq!(store.state.read().await.vehicle_locations.len(), 1);

        store
            .replace_agencies(
                true,
                vec![NewAgency {
                    tag: "sf-muni".to_string(),
                    title: "San Francisco Muni".to_string(),
                    short_title: None,
                    region_title: "California-Northern".to_string(),
                    api_call_id: None,
                }],
            )
            .await
            .unwrap();
        assert_eq!(store.state.read().await.routes.len(), 0);
        assert_eq!(store.state.read().await.directions.len(), 0);
        assert_eq!(
            store.state.read().await.vehicle_locations.len(),
            0,
            "vehicle locations for deleted routes must not outlive them"
        );
        assert_eq!(
            store.state.read().await.stops.len(),
            1,
            "stops outlive route refreshes"
        );
    }
}
