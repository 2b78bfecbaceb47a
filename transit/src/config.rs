//! Process configuration, loaded from environment variables (spec §6's
//! config table). No file format, no hot-reload: configuration loading
//! itself is named out of scope, so this is the minimum needed for the
//! binary to start.

use std::time::Duration;

use transit_ingest::scheduler::{
    DEFAULT_AGENCIES_INTERVAL, DEFAULT_EVICT_INTERVAL, DEFAULT_LOCATIONS_INTERVAL,
    DEFAULT_LOCATIONS_MAX_AGE, DEFAULT_PREDICTIONS_INTERVAL, DEFAULT_PREDICTIONS_MAX_AGE,
    DEFAULT_ROUTES_INTERVAL, SchedulerConfig,
};
use transit_store::memory::{DEFAULT_SAME_STOP_LAT, DEFAULT_SAME_STOP_LON};

/// Process-wide configuration assembled from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `AGENCIES`: comma-separated agency tags the scheduler refreshes.
    pub agencies: Vec<String>,
    /// `PREDICTIONS_MAX_AGE`: seconds, eviction age for `Prediction`.
    pub predictions_max_age: Duration,
    /// `LOCATIONS_MAX_AGE`: seconds, eviction age for `VehicleLocation`.
    pub locations_max_age: Duration,
    /// `SAME_STOP_LAT`: degree tolerance for stop coalescing.
    pub same_stop_lat: f64,
    /// `SAME_STOP_LON`: degree tolerance for stop coalescing.
    pub same_stop_lon: f64,
    /// Per-task interval overrides (the `CELERYBEAT_SCHEDULE` equivalent).
    pub agencies_interval: Duration,
    /// See above.
    pub routes_interval: Duration,
    /// See above.
    pub predictions_interval: Duration,
    /// See above.
    pub locations_interval: Duration,
    /// See above.
    pub evict_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agencies: Vec::new(),
            predictions_max_age: DEFAULT_PREDICTIONS_MAX_AGE,
            locations_max_age: DEFAULT_LOCATIONS_MAX_AGE,
            same_stop_lat: DEFAULT_SAME_STOP_LAT,
            same_stop_lon: DEFAULT_SAME_STOP_LON,
            agencies_interval: DEFAULT_AGENCIES_INTERVAL,
            routes_interval: DEFAULT_ROUTES_INTERVAL,
            predictions_interval: DEFAULT_PREDICTIONS_INTERVAL,
            locations_interval: DEFAULT_LOCATIONS_INTERVAL,
            evict_interval: DEFAULT_EVICT_INTERVAL,
        }
    }
}

impl Config {
    /// Load from the process environment, falling back to defaults for
    /// anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("AGENCIES") {
            config.agencies = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(secs) = env_u64("PREDICTIONS_MAX_AGE") {
            config.predictions_max_age = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("LOCATIONS_MAX_AGE") {
            config.locations_max_age = Duration::from_secs(secs);
        }
        if let Some(v) = env_f64("SAME_STOP_LAT") {
            config.same_stop_lat = v;
        }
        if let Some(v) = env_f64("SAME_STOP_LON") {
            config.same_stop_lon = v;
        }
        if let Some(secs) = env_u64("AGENCIES_REFRESH_INTERVAL") {
            config.agencies_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("ROUTES_REFRESH_INTERVAL") {
            config.routes_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("PREDICTIONS_REFRESH_INTERVAL") {
            config.predictions_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("LOCATIONS_REFRESH_INTERVAL") {
            config.locations_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("EVICT_INTERVAL") {
            config.evict_interval = Duration::from_secs(secs);
        }
        config
    }

    /// Build the `transit-ingest` scheduler config this process config implies.
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            agencies: self.agencies.clone(),
            agencies_interval: self.agencies_interval,
            routes_interval: self.routes_interval,
            predictions_interval: self.predictions_interval,
            locations_interval: self.locations_interval,
            evict_interval: self.evict_interval,
            predictions_max_age: self.predictions_max_age,
            locations_max_age: self.locations_max_age,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_f64(name: &str) -> Option<f64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_configured_agencies() {
        let config = Config::default();
        assert!(config.agencies.is_empty());
        assert_eq!(config.same_stop_lat, DEFAULT_SAME_STOP_LAT);
    }
}
