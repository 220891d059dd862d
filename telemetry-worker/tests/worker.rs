use std::sync::Arc;
use std::time::Duration;

use health::HealthRegistry;
use serde_json::json;
use time::macros::datetime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use telemetry_worker::error::WorkerError;
use telemetry_worker::feed::MemorySubscription;
use telemetry_worker::message_id::{MessageIdGenerator, MessageIdSource, WordList};
use telemetry_worker::pipeline::{AnalyticalFailurePolicy, IngestionPipeline};
use telemetry_worker::sinks::memory::{MemoryAnalyticalSink, MemoryObjectStore};
use telemetry_worker::sinks::{DualSinkWriter, Namespace};
use telemetry_worker::time::FixedTime;
use telemetry_worker::worker::IngestionWorker;

struct Running {
    feed: Arc<MemorySubscription>,
    objects: Arc<MemoryObjectStore>,
    registry: HealthRegistry,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<Result<(), WorkerError>>,
}

fn complete_payload(sensor: &str) -> String {
    json!({
        "sensorId": sensor,
        "device_status": "ok",
        "temp": 20.5,
        "humidity": "40",
        "pressure": 990,
        "battery": "low",
        "ts": "2024/05/01 12:00:00",
        "location": "MAN-01",
        "signal": 65
    })
    .to_string()
}

fn start(
    feed: Arc<MemorySubscription>,
    objects: Arc<MemoryObjectStore>,
    max_concurrent: usize,
    drain: Duration,
) -> Running {
    let pipeline = IngestionPipeline::new(
        MessageIdGenerator::new(
            WordList::parse(include_str!("../words.txt")).unwrap(),
            MessageIdSource::Delivery,
        ),
        DualSinkWriter::new(
            objects.clone(),
            Arc::new(MemoryAnalyticalSink::new()),
            Duration::from_secs(10),
        ),
        Arc::new(FixedTime {
            time: datetime!(2024-05-01 12:00:01 UTC),
        }),
        AnalyticalFailurePolicy::Acknowledge,
    );

    let registry = HealthRegistry::new("liveness");
    let liveness = registry.register("subscriber", Duration::from_secs(30));
    let worker = IngestionWorker::new(
        feed.clone(),
        pipeline,
        max_concurrent,
        10,
        Duration::from_millis(10),
        drain,
        liveness,
    );

    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    Running {
        feed,
        objects,
        registry,
        shutdown,
        handle,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn acks_processed_and_nacks_unparseable() {
    let feed = Arc::new(MemorySubscription::new());
    for i in 0..3 {
        feed.publish(&format!("{i}"), complete_payload(&format!("T-00{i}")));
    }
    feed.publish("bad", "not json at all");
    feed.publish("partial", r#"{"sensorId": "T-009"}"#);

    let running = start(
        feed.clone(),
        Arc::new(MemoryObjectStore::new()),
        4,
        Duration::from_secs(1),
    );

    wait_until(|| feed.acked().len() + feed.nacked().len() == 5).await;
    running.shutdown.send(true).unwrap();
    running.handle.await.unwrap().unwrap();

    let nacked = feed.nacked();
    assert_eq!(nacked.len(), 1);
    assert_eq!(nacked[0].message_id.as_deref(), Some("bad"));
    assert_eq!(feed.acked().len(), 4);
    assert_eq!(running.objects.keys(Namespace::Raw).len(), 4);
    assert_eq!(running.objects.keys(Namespace::Processed).len(), 3);
}

#[tokio::test]
async fn in_flight_runs_are_bounded() {
    let feed = Arc::new(MemorySubscription::new());
    for i in 0..8 {
        feed.publish(&format!("{i}"), complete_payload("T-001"));
    }
    let objects = Arc::new(MemoryObjectStore::new());
    objects.set_delay(Duration::from_millis(20));

    let running = start(feed.clone(), objects, 2, Duration::from_secs(1));

    let mut peak = 0;
    wait_until(|| {
        peak = peak.max(feed.outstanding());
        feed.acked().len() == 8
    })
    .await;
    running.shutdown.send(true).unwrap();
    running.handle.await.unwrap().unwrap();

    assert!(peak <= 2, "{peak} deliveries in flight");
    assert!(peak >= 1);
}

#[tokio::test]
async fn subscriber_reports_liveness_after_pulling() {
    let feed = Arc::new(MemorySubscription::new());
    let running = start(
        feed.clone(),
        Arc::new(MemoryObjectStore::new()),
        2,
        Duration::from_secs(1),
    );

    wait_until(|| running.registry.get_status().healthy).await;

    running.shutdown.send(true).unwrap();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_drains_in_flight_runs() {
    let feed = Arc::new(MemorySubscription::new());
    feed.publish("1", complete_payload("T-001"));
    feed.publish("2", complete_payload("T-002"));
    let objects = Arc::new(MemoryObjectStore::new());
    objects.set_delay(Duration::from_millis(200));

    let running = start(feed.clone(), objects, 4, Duration::from_secs(5));

    wait_until(|| feed.outstanding() == 2).await;
    running.shutdown.send(true).unwrap();
    running.handle.await.unwrap().unwrap();

    assert_eq!(feed.acked().len(), 2);
    assert_eq!(feed.outstanding(), 0);
}

#[tokio::test]
async fn drain_gives_up_after_deadline() {
    let feed = Arc::new(MemorySubscription::new());
    feed.publish("1", complete_payload("T-001"));
    let objects = Arc::new(MemoryObjectStore::new());
    objects.set_delay(Duration::from_secs(30));

    let running = start(feed.clone(), objects, 4, Duration::from_millis(50));

    wait_until(|| feed.outstanding() == 1).await;
    running.shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), running.handle)
        .await
        .expect("worker did not stop after the drain deadline")
        .unwrap()
        .unwrap();

    // Left unsettled, so the feed would redeliver it.
    assert!(feed.acked().is_empty());
    assert!(feed.nacked().is_empty());
    assert_eq!(feed.outstanding(), 1);
}
