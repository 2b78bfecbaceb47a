//! The persistence interface. `transit-core` defines only the trait; the
//! relational store itself (schema, migrations, transactions) is an
//! external collaborator. `transit-store` ships a `MemoryStore` reference
//! implementation used by tests and as the engine's default backing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    Agency, ApiCallLog, NewAgency, NewApiCall, NewPrediction, NewRoute, NewVehicleLocation,
    Prediction, Region, Route, RouteWithDetails, Stop, StopCandidate, VehicleLocation,
};

/// Transactional persistence for the transit data model.
///
/// Each method corresponds to one phase boundary an [`IngestionTask`] draws
/// (spec §9's "intent-to-write barrier" resolution): implementations are
/// expected to wrap each call's effect in a single transaction rather than
/// exposing begin/commit to callers.
///
/// [`IngestionTask`]: https://docs.rs/transit-ingest
#[async_trait]
pub trait Store: Send + Sync {
    /// Record one upstream call. Always succeeds unless the store itself is
    /// unreachable; called even for failed/transient upstream requests so
    /// quota accounting stays truthful.
    async fn insert_api_call(&self, call: NewApiCall) -> Result<ApiCallLog>;

    /// Sum of `size` over API calls at or after `since`, for quota accounting.
    async fn bytes_since(&self, since: DateTime<Utc>) -> Result<u64>;

    /// Replace the agency list wholesale (if `truncate`) and upsert the
    /// given agencies (creating their regions on first reference).
    async fn replace_agencies(&self, truncate: bool, agencies: Vec<NewAgency>) -> Result<Vec<Agency>>;

    /// All agencies currently on hand, for tasks that iterate the configured list.
    async fn agencies(&self) -> Result<Vec<Agency>>;

    /// Look up a region by title, if it exists.
    async fn find_region(&self, title: &str) -> Result<Option<Region>>;

    /// Replace an agency's routes wholesale (if `truncate`), upserting each
    /// route's directions and coalesce-or-creating its stops.
    async fn replace_routes_for_agency(
        &self,
        agency_tag: &str,
        truncate: bool,
        routes: Vec<NewRoute>,
    ) -> Result<Vec<RouteWithDetails>>;

    /// Fetch the current routes (with directions/stops) for a set of
    /// `(agency_tag, route_tag)` pairs, re-read fresh within the calling
    /// task's transaction per spec §4.6.
    async fn routes_by_tag(&self, keys: &[(String, String)]) -> Result<Vec<RouteWithDetails>>;

    /// Coalesce-or-create a stop per the streaming-mean rule in spec §4.5,
    /// and associate it with `route_id` under `candidate.stop_tag`.
    async fn get_or_create_stop(&self, route_id: i64, candidate: StopCandidate) -> Result<Stop>;

    /// Delete existing predictions for the given routes (used when `truncate`).
    async fn delete_predictions_for_routes(&self, route_ids: &[i64]) -> Result<u64>;

    /// Bulk-insert predictions in one atomic write.
    async fn insert_predictions(&self, predictions: Vec<NewPrediction>) -> Result<u64>;

    /// The most recent vehicle-location sample time recorded for a route,
    /// used to seed the upstream `t=` parameter.
    async fn latest_vehicle_location_time(&self, route_id: i64) -> Result<Option<DateTime<Utc>>>;

    /// Bulk-insert vehicle locations in one atomic write.
    async fn insert_vehicle_locations(&self, locations: Vec<NewVehicleLocation>) -> Result<u64>;

    /// Delete predictions created before `cutoff`. Returns the count removed.
    async fn evict_predictions_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Delete vehicle locations recorded before `cutoff`. Returns the count removed.
    async fn evict_vehicle_locations_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Fetch all routes belonging to an agency, for bounding-box derivation
    /// and operational reporting.
    async fn routes_for_agency(&self, agency_id: i64) -> Result<Vec<Route>>;

    /// Every prediction currently on hand, for tests and diagnostics.
    async fn all_predictions(&self) -> Result<Vec<Prediction>>;

    /// Every vehicle location currently on hand, for tests and diagnostics.
    async fn all_vehicle_locations(&self) -> Result<Vec<VehicleLocation>>;
}
