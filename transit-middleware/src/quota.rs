//! Tracks upstream bytes consumed against a sliding time window.
//!
//! Deliberately backed by the same store as the data it's metering (spec
//! §4.1's rationale): an in-process counter would let independent worker
//! processes each believe they have the full budget.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use transit_core::{Error, Result, Store};

/// Default sliding-window width: 20 seconds, per the upstream feed's rate
/// limit (spec §6).
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(20);
/// Default byte cap per window: 2 MiB, per the upstream feed's rate limit.
pub const DEFAULT_CAP_BYTES: u64 = 2 * 1024 * 1024;

/// Advisory byte-budget meter over a sliding window of [`ApiCallLog`] rows.
///
/// [`ApiCallLog`]: transit_core::ApiCallLog
pub struct QuotaMeter {
    store: Arc<dyn Store>,
    window: Duration,
    cap_bytes: u64,
}

impl QuotaMeter {
    /// Build a meter over `store` with the default window and cap.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            window: DEFAULT_WINDOW,
            cap_bytes: DEFAULT_CAP_BYTES,
        }
    }

    /// Override the sliding window width.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Override the byte cap per window.
    #[must_use]
    pub fn with_cap_bytes(mut self, cap_bytes: u64) -> Self {
        self.cap_bytes = cap_bytes;
        self
    }

    /// Bytes still spendable in the current window: `max(0, cap - used)`.
    pub async fn remaining(&self) -> Result<u64> {
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::zero());
        let since = Utc::now() - window;
        let used = self.store.bytes_since(since).await?;
        Ok(self.cap_bytes.saturating_sub(used))
    }

    /// Whether any request may currently be sent.
    pub async fn precheck(&self) -> Result<bool> {
        Ok(self.remaining().await? > 0)
    }

    /// Like [`precheck`](Self::precheck), but returns `QuotaExhausted`
    /// instead of `false` so callers can `?` straight through.
    pub async fn ensure_available(&self) -> Result<()> {
        let remaining = self.remaining().await?;
        if remaining == 0 {
            return Err(Error::quota_exhausted(0, 0, self.window));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::Mutex;
    use transit_core::*;

    #[derive(Default)]
    struct FakeStore {
        calls: Mutex<Vec<(DateTime<Utc>, u64)>>,
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn insert_api_call(&self, _call: NewApiCall) -> Result<ApiCallLog> {
            unimplemented!()
        }
        async fn bytes_since(&self, since: DateTime<Utc>) -> Result<u64> {
            let calls = self.calls.lock().unwrap();
            Ok(calls.iter().filter(|(t, _)| *t >= since).map(|(_, n)| n).sum())
        }
        async fn replace_agencies(&self, _truncate: bool, _agencies: Vec<NewAgency>) -> Result<Vec<Agency>> {
            unimplemented!()
        }
        async fn agencies(&self) -> Result<Vec<Agency>> {
            unimplemented!()
        }
        async fn find_region(&self, _title: &str) -> Result<Option<Region>> {
            unimplemented!()
        }
        async fn replace_routes_for_agency(
            &self,
            _agency_tag: &str,
            _truncate: bool,
            _routes: Vec<NewRoute>,
        ) -> Result<Vec<RouteWithDetails>> {
            unimplemented!()
        }
        async fn routes_by_tag(&self, _keys: &[(String, String)]) -> Result<Vec<RouteWithDetails>> {
            unimplemented!()
        }
        async fn get_or_create_stop(&self, _route_id: i64, _candidate: StopCandidate) -> Result<Stop> {
            unimplemented!()
        }
        async fn delete_predictions_for_routes(&self, _route_ids: &[i64]) -> Result<u64> {
            unimplemented!()
        }
        async fn insert_predictions(&self, _predictions: Vec<NewPrediction>) -> Result<u64> {
            unimplemented!()
        }
        async fn latest_vehicle_location_time(&self, _route_id: i64) -> Result<Option<DateTime<Utc>>> {
            unimplemented!()
        }
        async fn insert_vehicle_locations(&self, _locations: Vec<NewVehicleLocation>) -> Result<u64> {
            unimplemented!()
        }
        async fn evict_predictions_before(&self, _cutoff: DateTime<Utc>) -> Result<u64> {
            unimplemented!()
        }
        async fn evict_vehicle_locations_before(&self, _cutoff: DateTime<Utc>) -> Result<u64> {
            unimplemented!()
        }
        async fn routes_for_agency(&self, _agency_id: i64) -> Result<Vec<Route>> {
            unimplemented!()
        }
        async fn all_predictions(&self) -> Result<Vec<Prediction>> {
            unimplemented!()
        }
        async fn all_vehicle_locations(&self) -> Result<Vec<VehicleLocation>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn precheck_false_once_window_is_full() {
        let store = Arc::new(FakeStore::default());
        {
            let mut calls = store.calls.lock().unwrap();
            for _ in 0..20 {
                calls.push((Utc::now(), 110 * 1024));
            }
        }
        let meter = QuotaMeter::new(store)
            .with_window(Duration::from_secs(20))
            .with_cap_bytes(2 * 1024 * 1024);
        assert!(!meter.precheck().await.unwrap());
        assert!(meter.ensure_available().await.is_err());
    }

    #[tokio::test]
    async fn precheck_true_when_under_cap() {
        let store = Arc::new(FakeStore::default());
        let meter = QuotaMeter::new(store);
        assert!(meter.precheck().await.unwrap());
    }

    #[tokio::test]
    async fn old_calls_fall_out_of_the_window() {
        let store = Arc::new(FakeStore::default());
        {
            let mut calls = store.calls.lock().unwrap();
            calls.push((Utc::now() - chrono::Duration::seconds(30), 2 * 1024 * 1024));
        }
        let meter = QuotaMeter::new(store).with_window(Duration::from_secs(20));
        assert_eq!(meter.remaining().await.unwrap(), DEFAULT_CAP_BYTES);
    }
}
