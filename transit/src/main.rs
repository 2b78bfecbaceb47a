//! Binary entry point: wires configuration, the in-memory store, the
//! upstream client, the lock registry, and the scheduler together and runs
//! the ingestion loop.

mod config;

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use transit_client::UpstreamClient;
use transit_ingest::{IngestionTasks, Scheduler};
use transit_middleware::{LockRegistry, MemoryKvBackend, QuotaMeter};
use transit_store::MemoryStore;

use config::Config;

/// The transit ingestion engine: periodically pulls agency, route, stop,
/// prediction, and vehicle-location data from the upstream feed.
#[derive(Parser, Debug)]
#[command(name = "transit-ingest", version, about)]
struct Cli {
    /// Run each ingestion task exactly once, then exit, instead of looping
    /// forever at each task's configured interval. Useful for operational
    /// smoke tests.
    #[arg(long)]
    once: bool,

    /// Override `AGENCIES`: a comma-separated list of agency tags to refresh.
    #[arg(long, value_delimiter = ',')]
    agencies: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if !cli.agencies.is_empty() {
        config.agencies = cli.agencies;
    }

    if config.agencies.is_empty() {
        info!("no agencies configured (set AGENCIES or pass --agencies); agency refresh will still run, but routes/predictions/locations have nothing to do");
    }

    let store = Arc::new(MemoryStore::new().with_same_stop_tolerance(config.same_stop_lat, config.same_stop_lon));
    let quota = Arc::new(QuotaMeter::new(store.clone()));
    let client = Arc::new(UpstreamClient::new(store.clone(), quota));
    let locks = Arc::new(LockRegistry::new(Arc::new(MemoryKvBackend::new())));
    let tasks = Arc::new(IngestionTasks::new(store, client, locks));
    let scheduler = Arc::new(Scheduler::new(tasks, config.scheduler_config()));

    if cli.once {
        info!("running each ingestion task once");
        scheduler.run_once().await;
        return;
    }

    info!("starting scheduler");
    tokio::select! {
        () = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested, stopping (in-flight tasks run to completion)");
        }
    }
}
