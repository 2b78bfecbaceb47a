use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use transit_client::UpstreamClient;
use transit_ingest::IngestionTasks;
use transit_middleware::{LockRegistry, MemoryKvBackend, QuotaMeter};
use transit_store::MemoryStore;

fn tasks(server: &MockServer) -> IngestionTasks {
    let store: Arc<dyn transit_core::Store> = Arc::new(MemoryStore::new());
    let quota = Arc::new(QuotaMeter::new(store.clone()));
    let client = Arc::new(UpstreamClient::new(store.clone(), quota).with_base_url(server.base_url()));
    let locks = Arc::new(
        LockRegistry::new(Arc::new(MemoryKvBackend::new())).with_timeout(Duration::from_millis(200)),
    );
    IngestionTasks::new(store, client, locks)
}

#[tokio::test]
async fn refreshing_agencies_upserts_region_and_agency() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).query_param("command", "agencyList");
        then.status(200).body(
            r#"<body>
                <agency tag="sf-muni" title="San Francisco Muni" regionTitle="California-Northern" />
                <agency tag="actransit" title="AC Transit" shortTitle="AC" regionTitle="California-Northern" />
            </body>"#,
        );
    });

    let tasks = tasks(&server);
    let count = tasks.refresh_agencies(true).await.unwrap();

    mock.assert();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn empty_agency_list_leaves_store_untouched() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).query_param("command", "agencyList");
        then.status(200).body("<body></body>");
    });

    let tasks = tasks(&server);
    let count = tasks.refresh_agencies(true).await.unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn fatal_upstream_error_surfaces_as_upstream_fatal() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).query_param("command", "agencyList");
        then.status(200)
            .body(r#"<body><Error shouldRetry="false">Bad request.</Error></body>"#);
    });

    let tasks = tasks(&server);
    let err = tasks.refresh_agencies(true).await.unwrap_err();
    assert!(matches!(err, transit_core::Error::UpstreamFatal { .. }));
}
