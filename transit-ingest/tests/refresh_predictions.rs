use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use transit_client::UpstreamClient;
use transit_ingest::IngestionTasks;
use transit_middleware::{LockRegistry, MemoryKvBackend, QuotaMeter};
use transit_store::MemoryStore;

async fn seeded_with_one_route(server: &MockServer) -> (IngestionTasks, Arc<dyn transit_core::Store>) {
    let store: Arc<dyn transit_core::Store> = Arc::new(MemoryStore::new());
    store
        .replace_agencies(
            false,
            vec![transit_core::NewAgency {
                tag: "sf-muni".to_string(),
                title: "San Francisco Muni".to_string(),
                short_title: None,
                region_title: "California-Northern".to_string(),
                api_call_id: None,
            }],
        )
        .await
        .unwrap();

    server.mock(|when, then| {
        when.method(GET).query_param("command", "routeList").query_param("a", "sf-muni");
        then.status(200).body(r#"<body><route tag="38" /></body>"#);
    });
    server.mock(|when, then| {
        when.method(GET)
            .query_param("command", "routeConfig")
            .query_param("a", "sf-muni");
        then.status(200).body(
            r#"<body><route tag="38" title="Geary">
                <direction tag="38_0_var0" title="Outbound" />
                <stop tag="4288" title="Geary &amp; Masonic" lat="37.781" lon="-122.452" />
            </route></body>"#,
        );
    });

    let quota = Arc::new(QuotaMeter::new(store.clone()));
    let client = Arc::new(UpstreamClient::new(store.clone(), quota).with_base_url(server.base_url()));
    let locks = Arc::new(
        LockRegistry::new(Arc::new(MemoryKvBackend::new())).with_timeout(Duration::from_millis(200)),
    );
    let tasks = IngestionTasks::new(store.clone(), client, locks);
    tasks.refresh_routes(&["sf-muni".to_string()], true).await.unwrap();
    (tasks, store)
}

#[tokio::test]
async fn prediction_epoch_millis_convert_and_unknown_direction_is_null() {
    let server = MockServer::start();
    let (tasks, store) = seeded_with_one_route(&server).await;

    server.mock(|when, then| {
        when.method(GET)
            .query_param("command", "predictionsForMultiStops")
            .query_param("a", "sf-muni");
        then.status(200).body(
            r#"<body><predictions routeTag="38" stopTag="4288">
                <direction title="Outbound">
                    <prediction epochTime="1700000000000" isDeparture="false"
                        affectedByLayover="false" vehicle="5001" dirTag="38_0_var0" />
                    <prediction epochTime="1700000060000" isDeparture="true"
                        affectedByLayover="true" vehicle="5002" dirTag="nonexistent_dir" />
                </direction>
            </predictions></body>"#,
        );
    });

    let count = tasks.refresh_predictions(&["sf-muni".to_string()], true).await.unwrap();
    assert_eq!(count, 2);

    let predictions = store.all_predictions().await.unwrap();
    assert_eq!(predictions.len(), 2);

    let known = predictions.iter().find(|p| p.vehicle == "5001").unwrap();
    assert_eq!(known.prediction.timestamp_millis(), 1_700_000_000_000);
    assert!(known.direction_id.is_some());
    assert!(!known.is_departure);

    let unknown_dir = predictions.iter().find(|p| p.vehicle == "5002").unwrap();
    assert!(unknown_dir.direction_id.is_none());
    assert!(unknown_dir.is_departure);
    assert!(unknown_dir.has_layover);
}

#[tokio::test]
async fn prediction_for_stop_not_served_by_route_is_protocol_violation() {
    let server = MockServer::start();
    let (tasks, _store) = seeded_with_one_route(&server).await;

    server.mock(|when, then| {
        when.method(GET)
            .query_param("command", "predictionsForMultiStops")
            .query_param("a", "sf-muni");
        then.status(200).body(
            r#"<body><predictions routeTag="38" stopTag="9999">
                <direction title="Outbound">
                    <prediction epochTime="1700000000000" isDeparture="false"
                        affectedByLayover="false" vehicle="5001" />
                </direction>
            </predictions></body>"#,
        );
    });

    let err = tasks
        .refresh_predictions(&["sf-muni".to_string()], true)
        .await
        .unwrap_err();
    assert!(matches!(err, transit_core::Error::ProtocolViolation { .. }));
}
