//! Periodic task runner (spec §4.7). Each task gets its own interval and
//! its own unit of work; an overrunning firing is never queued behind
//! itself — `MissedTickBehavior::Skip` means a tick that arrives while the
//! previous firing is still running is simply dropped, and the next
//! firing waits for its own scheduled instant.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::warn;

use crate::tasks::IngestionTasks;

/// Default interval for `refresh_agencies` (spec §4.7).
pub const DEFAULT_AGENCIES_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Default interval for `refresh_routes`.
pub const DEFAULT_ROUTES_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default interval for `refresh_predictions`.
pub const DEFAULT_PREDICTIONS_INTERVAL: Duration = Duration::from_secs(9);
/// Default interval for `refresh_vehicle_locations`.
pub const DEFAULT_LOCATIONS_INTERVAL: Duration = Duration::from_secs(4);
/// Default interval for both eviction tasks.
pub const DEFAULT_EVICT_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Default prediction retention age.
pub const DEFAULT_PREDICTIONS_MAX_AGE: Duration = Duration::from_secs(10 * 60);
/// Default vehicle-location retention age.
pub const DEFAULT_LOCATIONS_MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// Cadence and scope configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Agency tags the scheduler refreshes routes/predictions/locations for.
    pub agencies: Vec<String>,
    /// Interval between `refresh_agencies` firings.
    pub agencies_interval: Duration,
    /// Interval between `refresh_routes` firings.
    pub routes_interval: Duration,
    /// Interval between `refresh_predictions` firings.
    pub predictions_interval: Duration,
    /// Interval between `refresh_vehicle_locations` firings.
    pub locations_interval: Duration,
    /// Interval between eviction sweeps (both predictions and locations).
    pub evict_interval: Duration,
    /// Prediction rows older than this are evicted.
    pub predictions_max_age: Duration,
    /// Vehicle location rows older than this are evicted.
    pub locations_max_age: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            agencies: Vec::new(),
            agencies_interval: DEFAULT_AGENCIES_INTERVAL,
            routes_interval: DEFAULT_ROUTES_INTERVAL,
            predictions_interval: DEFAULT_PREDICTIONS_INTERVAL,
            locations_interval: DEFAULT_LOCATIONS_INTERVAL,
            evict_interval: DEFAULT_EVICT_INTERVAL,
            predictions_max_age: DEFAULT_PREDICTIONS_MAX_AGE,
            locations_max_age: DEFAULT_LOCATIONS_MAX_AGE,
        }
    }
}

/// Runs the six scheduled firings (spec's five tasks, with eviction split
/// into its two kinds) as independent periodic loops.
pub struct Scheduler {
    tasks: Arc<IngestionTasks>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Build a scheduler over the given tasks and cadence configuration.
    #[must_use]
    pub fn new(tasks: Arc<IngestionTasks>, config: SchedulerConfig) -> Self {
        Self { tasks, config }
    }

    /// Run each task exactly once, in dependency order (agencies before
    /// routes before predictions/locations), and return once all have
    /// completed. Used by `--once` and by operational smoke tests.
    pub async fn run_once(&self) {
        self.log_outcome("refresh_agencies", self.tasks.refresh_agencies(true).await);
        self.log_outcome(
            "refresh_routes",
            self.tasks.refresh_routes(&self.config.agencies, true).await,
        );
        self.log_outcome(
            "refresh_predictions",
            self.tasks.refresh_predictions(&self.config.agencies, false).await,
        );
        self.log_outcome(
            "refresh_vehicle_locations",
            self.tasks.refresh_vehicle_locations(&self.config.agencies).await,
        );
        self.log_outcome(
            "evict_stale_predictions",
            self.tasks.evict_stale_predictions(self.config.predictions_max_age).await,
        );
        self.log_outcome(
            "evict_stale_vehicle_locations",
            self.tasks
                .evict_stale_vehicle_locations(self.config.locations_max_age)
                .await,
        );
    }

    /// Run forever, each task on its own interval. Returns only if every
    /// spawned loop panics (which should not happen in practice).
    pub async fn run(self: Arc<Self>) {
        let agencies = self.clone();
        let routes = self.clone();
        let predictions = self.clone();
        let locations = self.clone();
        let evict_predictions = self.clone();
        let evict_locations = self.clone();

        let handles = vec![
            tokio::spawn(loop_forever(self.config.agencies_interval, move || {
                let scheduler = agencies.clone();
                async move {
                    scheduler.log_outcome("refresh_agencies", scheduler.tasks.refresh_agencies(true).await);
                }
            })),
            tokio::spawn(loop_forever(self.config.routes_interval, move || {
                let scheduler = routes.clone();
                async move {
                    scheduler.log_outcome(
                        "refresh_routes",
                        scheduler.tasks.refresh_routes(&scheduler.config.agencies, true).await,
                    );
                }
            })),
            tokio::spawn(loop_forever(self.config.predictions_interval, move || {
                let scheduler = predictions.clone();
                async move {
                    scheduler.log_outcome(
                        "refresh_predictions",
                        scheduler
                            .tasks
                            .refresh_predictions(&scheduler.config.agencies, false)
                            .await,
                    );
                }
            })),
            tokio::spawn(loop_forever(self.config.locations_interval, move || {
                let scheduler = locations.clone();
                async move {
                    scheduler.log_outcome(
                        "refresh_vehicle_locations",
                        scheduler
                            .tasks
                            .refresh_vehicle_locations(&scheduler.config.agencies)
                            .await,
                    );
                }
            })),
            tokio::spawn(loop_forever(self.config.evict_interval, move || {
                let scheduler = evict_predictions.clone();
                async move {
                    scheduler.log_outcome(
                        "evict_stale_predictions",
                        scheduler
                            .tasks
                            .evict_stale_predictions(scheduler.config.predictions_max_age)
                            .await,
                    );
                }
            })),
            tokio::spawn(loop_forever(self.config.evict_interval, move || {
                let scheduler = evict_locations.clone();
                async move {
                    scheduler.log_outcome(
                        "evict_stale_vehicle_locations",
                        scheduler
                            .tasks
                            .evict_stale_vehicle_locations(scheduler.config.locations_max_age)
                            .await,
                    );
                }
            })),
        ];

        for handle in handles {
            let _ = handle.await;
        }
    }

    fn log_outcome<T: std::fmt::Debug>(&self, name: &str, result: transit_core::Result<T>) {
        if let Err(err) = result {
            warn!(task = name, %err, "task firing failed; next scheduled firing will retry");
        }
    }
}

async fn loop_forever<F, Fut>(period: Duration, mut body: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        body().await;
    }
}
