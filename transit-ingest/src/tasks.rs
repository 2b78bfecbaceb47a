//! The five named ingestion tasks (spec §4.6), each acquiring its lock
//! matrix, calling the upstream client, normalizing, and persisting.
//!
//! Grounded on `original_source/nextbus.py`'s `get_agencies`/`get_routes`/
//! `get_predictions`/`get_vehicle_locations`/`delete_stale_*`, and on
//! `celerytasks.py`'s one-line operator summaries (row count + elapsed
//! time), reproduced here with `tracing::info!` in place of `print(...)`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};
use transit_client::normalize::{self, ParsedRoute};
use transit_client::UpstreamClient;
use transit_core::{
    Error, NewAgency, NewDirection, NewPrediction, NewRoute, NewVehicleLocation, Result,
    RouteWithDetails, Store, StopCandidate,
};
use transit_middleware::LockRegistry;

const MAX_ROUTECONFIG_BATCH: usize = 100;
const MAX_PREDICTION_STOPS: usize = 150;

/// The five ingestion tasks, sharing a store, client, and lock registry.
pub struct IngestionTasks {
    store: Arc<dyn Store>,
    client: Arc<UpstreamClient>,
    locks: Arc<LockRegistry>,
}

impl IngestionTasks {
    /// Build the task set.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, client: Arc<UpstreamClient>, locks: Arc<LockRegistry>) -> Self {
        Self { store, client, locks }
    }

    /// Refresh the agency list from `agencyList`. Takes `agencies` exclusively.
    pub async fn refresh_agencies(&self, truncate: bool) -> Result<usize> {
        let started = Instant::now();
        let guard = self.locks.acquire_exclusive("agencies").await?;

        let result = async {
            let params = vec![("command".to_string(), "agencyList".to_string())];
            let (elements, api_call) = self.client.request(params, "agency").await?;
            let Some(elements) = elements else {
                return Ok(0);
            };
            let agencies: Vec<NewAgency> = elements
                .iter()
                .map(|el| {
                    let parsed = normalize::parse_agency(el)?;
                    Ok(NewAgency {
                        tag: parsed.tag,
                        title: parsed.title,
                        short_title: parsed.short_title,
                        region_title: parsed.region_title,
                        api_call_id: Some(api_call.id),
                    })
                })
                .collect::<Result<_>>()?;
            let count = agencies.len();
            self.store.replace_agencies(truncate, agencies).await?;
            Ok(count)
        }
        .await;

        guard.release().await?;
        let count = result?;
        info!(count, elapsed_ms = started.elapsed().as_millis() as u64, "refresh_agencies");
        Ok(count)
    }

    /// Refresh routes/directions/stops for each of `agency_tags`. Takes
    /// `agencies` shared and `routes` exclusive.
    pub async fn refresh_routes(&self, agency_tags: &[String], truncate: bool) -> Result<usize> {
        let started = Instant::now();
        let agencies_guard = self.locks.acquire_shared("agencies").await?;
        let routes_guard = self.locks.acquire_exclusive("routes").await?;

        let result = async {
            let mut total = 0usize;
            for agency_tag in agency_tags {
                total += self.refresh_routes_for_agency(agency_tag, truncate).await?;
            }
            Ok(total)
        }
        .await;

        routes_guard.release().await?;
        agencies_guard.release().await?;
        let total = result?;
        info!(
            route_count = total,
            agency_count = agency_tags.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "refresh_routes"
        );
        Ok(total)
    }

    async fn refresh_routes_for_agency(&self, agency_tag: &str, truncate: bool) -> Result<usize> {
        let list_params = vec![
            ("command".to_string(), "routeList".to_string()),
            ("a".to_string(), agency_tag.to_string()),
        ];
        let (route_list, _) = self.client.request(list_params, "route").await?;
        let Some(route_list) = route_list else {
            return Ok(0);
        };
        let all_tags: Vec<String> = route_list
            .iter()
            .filter_map(|el| el.attr("tag").map(str::to_string))
            .collect();
        if all_tags.is_empty() {
            return Ok(0);
        }

        let mut parsed_routes: Vec<(ParsedRoute, Option<i64>)> = Vec::new();

        let batch_params = vec![
            ("command".to_string(), "routeConfig".to_string()),
            ("a".to_string(), agency_tag.to_string()),
        ];
        let (batch_elements, batch_call) = self.client.request(batch_params, "route").await?;
        if let Some(batch_elements) = batch_elements {
            for el in batch_elements.iter().take(MAX_ROUTECONFIG_BATCH) {
                parsed_routes.push((normalize::parse_route(el)?, Some(batch_call.id)));
            }
        }

        let seen: std::collections::HashSet<&str> =
            parsed_routes.iter().map(|(r, _)| r.tag.as_str()).collect();
        let remaining_tags: Vec<&String> = all_tags.iter().filter(|t| !seen.contains(t.as_str())).collect();

        if !remaining_tags.is_empty() {
            let requests = remaining_tags
                .iter()
                .map(|tag| {
                    (
                        vec![
                            ("command".to_string(), "routeConfig".to_string()),
                            ("a".to_string(), agency_tag.to_string()),
                            ("route".to_string(), (*tag).clone()),
                        ],
                        "route".to_string(),
                    )
                })
                .collect();
            let responses = self.client.async_request(requests).await?;
            for (elements, api_call) in responses {
                if let Some(elements) = elements.as_ref().and_then(|e| e.first()) {
                    parsed_routes.push((normalize::parse_route(elements)?, Some(api_call.id)));
                }
            }
        }

        let new_routes: Vec<NewRoute> = parsed_routes
            .into_iter()
            .map(|(route, api_call_id)| NewRoute {
                tag: route.tag,
                title: route.title,
                short_title: None,
                color: route.color,
                opposite_color: route.opposite_color,
                lat_min: route.lat_min,
                lat_max: route.lat_max,
                lon_min: route.lon_min,
                lon_max: route.lon_max,
                api_call_id,
                directions: route
                    .directions
                    .into_iter()
                    .map(|d| NewDirection {
                        tag: d.tag,
                        title: d.title,
                        name: d.name,
                        api_call_id,
                    })
                    .collect(),
                stops: route
                    .stops
                    .into_iter()
                    .map(|s| StopCandidate {
                        title: s.title,
                        lat: s.lat,
                        lon: s.lon,
                        stop_id: s.stop_id,
                        stop_tag: s.stop_tag,
                        api_call_id,
                    })
                    .collect(),
            })
            .collect();

        let count = new_routes.len();
        self.store
            .replace_routes_for_agency(agency_tag, truncate, new_routes)
            .await?;
        Ok(count)
    }

    /// Pull arrival predictions for every route belonging to `agency_tags`.
    /// Takes `agencies` and `routes` shared.
    pub async fn refresh_predictions(&self, agency_tags: &[String], truncate: bool) -> Result<usize> {
        let started = Instant::now();
        let agencies_guard = self.locks.acquire_shared("agencies").await?;
        let routes_guard = self.locks.acquire_shared("routes").await?;

        let result = self.refresh_predictions_inner(agency_tags, truncate).await;

        routes_guard.release().await?;
        agencies_guard.release().await?;
        let count = result?;
        info!(
            prediction_count = count,
            agency_count = agency_tags.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "refresh_predictions"
        );
        Ok(count)
    }

    async fn refresh_predictions_inner(&self, agency_tags: &[String], truncate: bool) -> Result<usize> {
        let mut by_key: HashMap<(String, String), RouteWithDetails> = HashMap::new();
        let mut route_ids: Vec<i64> = Vec::new();
        let mut requests: Vec<(Vec<(String, String)>, String)> = Vec::new();

        for agency_tag in agency_tags {
            let routes = self.routes_for_agency_tag(agency_tag).await?;
            let keys: Vec<(String, String)> = routes.iter().map(|r| (agency_tag.clone(), r.tag.clone())).collect();
            let details = self.store.routes_by_tag(&keys).await?;

            let mut stop_pairs: Vec<String> = Vec::new();
            for detail in &details {
                route_ids.push(detail.route.id);
                for route_stop in &detail.route_stops {
                    stop_pairs.push(format!("{}|{}", detail.route.tag, route_stop.stop_tag));
                }
                by_key.insert((agency_tag.clone(), detail.route.tag.clone()), detail.clone());
            }

            for batch in stop_pairs.chunks(MAX_PREDICTION_STOPS) {
                let mut params = vec![
                    ("command".to_string(), "predictionsForMultiStops".to_string()),
                    ("a".to_string(), agency_tag.clone()),
                ];
                for pair in batch {
                    params.push(("stops".to_string(), pair.clone()));
                }
                requests.push((params, "predictions".to_string()));
            }
        }

        if requests.is_empty() {
            return Ok(0);
        }

        if truncate && !route_ids.is_empty() {
            self.store.delete_predictions_for_routes(&route_ids).await?;
        }

        let responses = self.client.async_request(requests).await?;
        let mut new_predictions = Vec::new();

        for (elements, api_call) in responses {
            let Some(elements) = elements else { continue };
            let agency_tag = api_call
                .params
                .get("a")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            for el in &elements {
                let set = normalize::parse_prediction_set(el)?;
                let route = by_key
                    .get(&(agency_tag.clone(), set.route_tag.clone()))
                    .ok_or_else(|| {
                        Error::protocol_violation(format!(
                            "predictions for unknown route '{}' in agency '{agency_tag}'",
                            set.route_tag
                        ))
                    })?;
                let stop_id = route.stop_id_for_tag(&set.stop_tag).ok_or_else(|| {
                    Error::protocol_violation(format!(
                        "predictions reference stop '{}' not served by route '{}'",
                        set.stop_tag, route.route.tag
                    ))
                })?;
                for prediction in set.predictions {
                    let direction_id = prediction
                        .dir_tag
                        .as_deref()
                        .and_then(|tag| route.direction_id_for_tag(tag));
                    new_predictions.push(NewPrediction {
                        route_id: route.route.id,
                        stop_id,
                        direction_id,
                        prediction: prediction.prediction,
                        is_departure: prediction.is_departure,
                        has_layover: prediction.has_layover,
                        vehicle: prediction.vehicle,
                        block: prediction.block,
                        api_call_id: Some(api_call.id),
                    });
                }
            }
        }

        let count = new_predictions.len();
        if count > 0 {
            self.store.insert_predictions(new_predictions).await?;
        }
        Ok(count)
    }

    /// Pull vehicle GPS samples for every route belonging to `agency_tags`.
    /// Takes `agencies` and `routes` shared.
    pub async fn refresh_vehicle_locations(&self, agency_tags: &[String]) -> Result<usize> {
        let started = Instant::now();
        let agencies_guard = self.locks.acquire_shared("agencies").await?;
        let routes_guard = self.locks.acquire_shared("routes").await?;

        let result = self.refresh_vehicle_locations_inner(agency_tags).await;

        routes_guard.release().await?;
        agencies_guard.release().await?;
        let count = result?;
        info!(
            location_count = count,
            agency_count = agency_tags.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "refresh_vehicle_locations"
        );
        Ok(count)
    }

    async fn refresh_vehicle_locations_inner(&self, agency_tags: &[String]) -> Result<usize> {
        let mut details: Vec<(String, RouteWithDetails)> = Vec::new();
        for agency_tag in agency_tags {
            let routes = self.routes_for_agency_tag(agency_tag).await?;
            let keys: Vec<(String, String)> = routes.iter().map(|r| (agency_tag.clone(), r.tag.clone())).collect();
            let fetched = self.store.routes_by_tag(&keys).await?;
            details.extend(fetched.into_iter().map(|d| (agency_tag.clone(), d)));
        }
        if details.is_empty() {
            return Ok(0);
        }

        let mut requests = Vec::with_capacity(details.len());
        for (agency_tag, detail) in &details {
            let since_ms = self
                .store
                .latest_vehicle_location_time(detail.route.id)
                .await?
                .map_or(0, |t| t.timestamp_millis());
            requests.push((
                vec![
                    ("command".to_string(), "vehicleLocations".to_string()),
                    ("a".to_string(), agency_tag.clone()),
                    ("r".to_string(), detail.route.tag.clone()),
                    ("t".to_string(), since_ms.to_string()),
                ],
                "vehicle".to_string(),
            ));
        }

        let responses = self.client.async_request(requests).await?;
        let mut new_locations = Vec::new();
        for ((_, detail), (elements, api_call)) in details.iter().zip(responses) {
            let Some(elements) = elements else { continue };
            for el in &elements {
                let vehicle = normalize::parse_vehicle(el)?;
                let direction_id = vehicle
                    .dir_tag
                    .as_deref()
                    .and_then(|tag| detail.direction_id_for_tag(tag));
                let time = Utc::now() - ChronoDuration::seconds(vehicle.secs_since_report);
                new_locations.push(NewVehicleLocation {
                    vehicle: vehicle.vehicle,
                    route_id: detail.route.id,
                    direction_id,
                    lat: vehicle.lat,
                    lon: vehicle.lon,
                    time,
                    predictable: vehicle.predictable,
                    heading: vehicle.heading,
                    speed: vehicle.speed_km_hr,
                    api_call_id: Some(api_call.id),
                });
            }
        }

        let count = new_locations.len();
        if count > 0 {
            self.store.insert_vehicle_locations(new_locations).await?;
        }
        Ok(count)
    }

    /// Delete predictions older than `max_age`.
    pub async fn evict_stale_predictions(&self, max_age: std::time::Duration) -> Result<u64> {
        let cutoff = Utc::now() - chrono_duration(max_age);
        let deleted = self.store.evict_predictions_before(cutoff).await?;
        info!(deleted, "evict_stale_predictions");
        Ok(deleted)
    }

    /// Delete vehicle locations older than `max_age`.
    pub async fn evict_stale_vehicle_locations(&self, max_age: std::time::Duration) -> Result<u64> {
        let cutoff = Utc::now() - chrono_duration(max_age);
        let deleted = self.store.evict_vehicle_locations_before(cutoff).await?;
        info!(deleted, "evict_stale_vehicle_locations");
        Ok(deleted)
    }

    async fn routes_for_agency_tag(&self, agency_tag: &str) -> Result<Vec<transit_core::Route>> {
        let agencies = self.store.agencies().await?;
        let Some(agency) = agencies.iter().find(|a| a.tag == agency_tag) else {
            warn!(agency_tag, "unknown agency tag, skipping");
            return Ok(Vec::new());
        };
        self.store.routes_for_agency(agency.id).await
    }
}

fn chrono_duration(d: std::time::Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or_else(|_| ChronoDuration::zero())
}
