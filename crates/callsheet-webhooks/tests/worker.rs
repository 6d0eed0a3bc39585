mod common;

use std::sync::Arc;
use std::time::Duration;

use callsheet_webhooks::{
    DeliveryStatus, DeliveryStore, Event, FakeTimeSource, InMemoryWebhookStore, NewSubscription,
    RedriveWorker, RetryPolicy, WebhookEngine,
};
use common::{Behaviour, RecordingTransport, T0};
use tokio::sync::watch;

struct Fixture {
    store: Arc<InMemoryWebhookStore>,
    transport: Arc<RecordingTransport>,
    engine: Arc<WebhookEngine<InMemoryWebhookStore, InMemoryWebhookStore>>,
}

async fn fixture_with_failed_delivery() -> Fixture {
    let store = Arc::new(InMemoryWebhookStore::new());
    let transport = Arc::new(RecordingTransport::default());
    let engine = Arc::new(
        WebhookEngine::new(
            store.clone(),
            store.clone(),
            transport.clone(),
            RetryPolicy::default(),
        )
        .with_time_source(Arc::new(FakeTimeSource::new(T0))),
    );

    let sub = engine
        .create_subscription(NewSubscription {
            organization_id: "org1".into(),
            endpoint_url: "https://hooks.example.com/callsheet".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    transport.set_behaviour(&sub.id, Some(Behaviour::Fail));
    let event = Event::new("order.created", serde_json::json!({}), T0);
    engine.dispatch("org1", &event).await.unwrap();
    transport.set_behaviour(&sub.id, None);

    Fixture {
        store,
        transport,
        engine,
    }
}

#[tokio::test]
async fn test_run_once_redrives_a_batch() {
    let f = fixture_with_failed_delivery().await;
    let worker = RedriveWorker::new(f.engine.clone(), 10);

    let report = worker.run_once().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.succeeded, 1);

    let stats = f.engine.delivery_stats("org1").await.unwrap();
    assert_eq!(stats.success, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let f = fixture_with_failed_delivery().await;
    let worker = RedriveWorker::new(f.engine.clone(), 10);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        worker.run(Duration::from_millis(10), shutdown_rx).await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker stopped")
        .unwrap();

    // dispatch plus exactly one successful redrive
    assert_eq!(f.transport.call_count(), 2);
    let all = f.store.all_deliveries().await;
    assert_eq!(all[0].status, DeliveryStatus::Success);
    assert_eq!(all[0].attempt, 2);
    assert!(
        f.store
            .list_failed(10, 5)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_run_stops_when_sender_dropped() {
    let f = fixture_with_failed_delivery().await;
    let worker = RedriveWorker::new(f.engine, 10);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        worker.run(Duration::from_secs(3600), shutdown_rx).await;
    });

    drop(shutdown_tx);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker stopped")
        .unwrap();
}
