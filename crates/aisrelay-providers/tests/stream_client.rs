//! Stream client tests against a scripted in-memory feed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;

use aisrelay_core::{
    FeedSettings, MemoryStore, Mmsi, PositionReport, StoreError, VesselPage, VesselQuery,
    VesselStore, VesselSummary,
};
use aisrelay_providers::{
    ConnectionState, FeedConnector, FeedError, FeedStream, FrameOutcome, IngestError,
    SharedStore, StreamClient,
};
use aisrelay_server::{SinkError, SubscriberRegistry, SubscriberSink, Topic};

const TESTSHIP: &str = r#"{"MessageType":"PositionReport","MetaData":{"MMSI":123456789,"ShipName":"TESTSHIP"},"Message":{"PositionReport":{"Latitude":10.5,"Longitude":20.5,"Sog":12.3,"Cog":90.0}}}"#;

fn position_frame(mmsi: i64, name: &str) -> String {
    format!(
        r#"{{"MessageType":"PositionReport","MetaData":{{"MMSI":{mmsi},"ShipName":"{name}"}},"Message":{{"PositionReport":{{"Latitude":52.0,"Longitude":4.0}}}}}}"#
    )
}

fn settings() -> FeedSettings {
    FeedSettings {
        api_key: Some("test-key".to_string()),
        url: "wss://feed.invalid/v0/stream".to_string(),
        ..FeedSettings::default()
    }
}

fn mmsi(value: u64) -> Mmsi {
    Mmsi::new(value).unwrap()
}

// ============================================================================
// Scripted transport
// ============================================================================

/// Feed connection replaying a fixed list of frames, then staying open.
struct ScriptedStream {
    frames: VecDeque<Vec<u8>>,
    sent: Arc<Mutex<Vec<String>>>,
    close_after_frames: bool,
}

#[async_trait]
impl FeedStream for ScriptedStream {
    async fn send_text(&mut self, text: String) -> Result<(), FeedError> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, FeedError>> {
        match self.frames.pop_front() {
            Some(frame) => Some(Ok(frame)),
            None if self.close_after_frames => None,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {}
}

/// Connector handing out one scripted stream per entry, failing once they run out.
#[derive(Default)]
struct ScriptedConnector {
    scripts: Mutex<VecDeque<ScriptedStream>>,
    attempts: Mutex<Vec<Instant>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    fn push(&self, frames: &[&str], close_after_frames: bool) {
        self.scripts.lock().unwrap().push_back(ScriptedStream {
            frames: frames.iter().map(|f| f.as_bytes().to_vec()).collect(),
            sent: self.sent.clone(),
            close_after_frames,
        });
    }

    fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedConnector for ScriptedConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn FeedStream>, FeedError> {
        self.attempts.lock().unwrap().push(Instant::now());
        match self.scripts.lock().unwrap().pop_front() {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(FeedError::Connect("connection refused".to_string())),
        }
    }
}

// ============================================================================
// Test doubles for store and subscribers
// ============================================================================

/// Store whose first `failures` writes fail.
struct FlakyStore {
    inner: MemoryStore,
    failures: usize,
}

impl FlakyStore {
    fn should_fail(&mut self) -> bool {
        let fail = self.failures > 0;
        self.failures = self.failures.saturating_sub(1);
        fail
    }
}

impl VesselStore for FlakyStore {
    fn upsert_vessel(&mut self, mmsi: Mmsi, name: Option<&str>) -> Result<bool, StoreError> {
        if self.should_fail() {
            return Err(StoreError::Unavailable("database down".to_string()));
        }
        self.inner.upsert_vessel(mmsi, name)
    }

    fn append_position(&mut self, report: &PositionReport) -> Result<(), StoreError> {
        if self.should_fail() {
            return Err(StoreError::WriteFailed("database down".to_string()));
        }
        self.inner.append_position(report)
    }

    fn vessel(&self, mmsi: Mmsi) -> Result<Option<VesselSummary>, StoreError> {
        self.inner.vessel(mmsi)
    }

    fn latest_position(&self, mmsi: Mmsi) -> Result<Option<PositionReport>, StoreError> {
        self.inner.latest_position(mmsi)
    }

    fn latest_positions(&self, query: &VesselQuery) -> Result<VesselPage, StoreError> {
        self.inner.latest_positions(query)
    }

    fn track(&self, mmsi: Mmsi, since: DateTime<Utc>) -> Result<Vec<PositionReport>, StoreError> {
        self.inner.track(mmsi, since)
    }

    fn vessel_count(&self) -> Result<usize, StoreError> {
        self.inner.vessel_count()
    }

    fn position_count(&self) -> Result<usize, StoreError> {
        self.inner.position_count()
    }
}

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl SubscriberSink for RecordingSink {
    async fn send_text(&self, text: String) -> Result<(), SinkError> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }
}

/// Subscriber that never finishes a send.
struct StalledSink;

#[async_trait]
impl SubscriberSink for StalledSink {
    async fn send_text(&self, _text: String) -> Result<(), SinkError> {
        std::future::pending().await
    }
}

struct Harness {
    client: Arc<StreamClient>,
    connector: Arc<ScriptedConnector>,
    store: Arc<RwLock<MemoryStore>>,
    registry: Arc<SubscriberRegistry>,
    subscriber: Arc<RecordingSink>,
}

async fn harness(settings: FeedSettings) -> Harness {
    let connector = Arc::new(ScriptedConnector::default());
    let store = Arc::new(RwLock::new(MemoryStore::new()));
    let registry = Arc::new(SubscriberRegistry::new());

    let subscriber = Arc::new(RecordingSink::default());
    let id = registry.connect(subscriber.clone()).await;
    registry.subscribe(id, Topic::PositionUpdates).await;

    let shared: SharedStore = store.clone();
    let client = Arc::new(StreamClient::with_connector(
        settings,
        connector.clone(),
        shared,
        registry.clone(),
    ));

    Harness {
        client,
        connector,
        store,
        registry,
        subscriber,
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ============================================================================
// Pipeline
// ============================================================================

#[tokio::test]
async fn test_position_report_persisted() {
    let h = harness(settings()).await;

    let outcome = h.client.handle_frame(TESTSHIP.as_bytes()).await.unwrap();
    assert_eq!(
        outcome,
        FrameOutcome::Processed {
            mmsi: mmsi(123456789),
            new_vessel: true
        }
    );

    let store = h.store.read().await;
    let vessel = store.vessel(mmsi(123456789)).unwrap().unwrap();
    assert_eq!(vessel.name.as_deref(), Some("TESTSHIP"));
    assert_eq!(store.position_count().unwrap(), 1);

    let latest = store.latest_position(mmsi(123456789)).unwrap().unwrap();
    assert_eq!(latest.latitude, Some(10.5));
    assert_eq!(latest.longitude, Some(20.5));
    assert_eq!(latest.speed_over_ground, Some(12.3));
    assert_eq!(latest.course_over_ground, Some(90.0));
    assert_eq!(latest.heading, None);
    assert_eq!(latest.nav_status, None);
    assert_eq!(latest.data_source, "aisstream");

    let stats = h.client.stats();
    assert_eq!(stats.messages_received, 1);
    assert_eq!(stats.positions_processed, 1);
}

#[tokio::test]
async fn test_error_frame_is_not_processed() {
    let h = harness(settings()).await;

    let outcome = h
        .client
        .handle_frame(br#"{"error":"subscription limit exceeded"}"#)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        FrameOutcome::FeedError("subscription limit exceeded".to_string())
    );

    let stats = h.client.stats();
    assert_eq!(stats.messages_received, 1);
    assert_eq!(stats.positions_processed, 0);
    assert_eq!(h.store.read().await.position_count().unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_mmsi_dropped() {
    let h = harness(settings()).await;

    for frame in [
        position_frame(0, "ZERO"),
        position_frame(-1, "NEGATIVE"),
        r#"{"MessageType":"PositionReport","MetaData":{},"Message":{}}"#.to_string(),
    ] {
        let result = h.client.handle_frame(frame.as_bytes()).await;
        assert!(matches!(result, Err(IngestError::Validation(_))));
    }

    let stats = h.client.stats();
    assert_eq!(stats.messages_received, 3);
    assert_eq!(stats.positions_processed, 0);
    assert_eq!(stats.decode_errors, 0);
    assert_eq!(stats.persistence_errors, 0);
    assert_eq!(h.store.read().await.vessel_count().unwrap(), 0);
}

#[tokio::test]
async fn test_every_frame_counts_as_received() {
    let h = harness(settings()).await;

    let frames = [
        TESTSHIP.to_string(),
        "not json".to_string(),
        "[1,2]".to_string(),
        r#"{"MessageType":"ShipStaticData","MetaData":{"MMSI":5}}"#.to_string(),
        r#"{"error":"rate limited"}"#.to_string(),
        position_frame(-3, "BAD"),
    ];
    for frame in &frames {
        let _ = h.client.handle_frame(frame.as_bytes()).await;
    }

    let stats = h.client.stats();
    assert_eq!(stats.messages_received, frames.len() as u64);
    assert_eq!(stats.positions_processed, 1);
    assert_eq!(stats.decode_errors, 2);
}

#[tokio::test]
async fn test_unknown_message_type_ignored() {
    let h = harness(settings()).await;

    let outcome = h
        .client
        .handle_frame(br#"{"MessageType":"ShipStaticData","MetaData":{"MMSI":5,"ShipName":"X"}}"#)
        .await
        .unwrap();
    assert_eq!(outcome, FrameOutcome::Ignored);
    assert_eq!(h.store.read().await.vessel_count().unwrap(), 0);
    assert_eq!(h.client.stats().positions_processed, 0);
}

#[tokio::test]
async fn test_first_name_wins() {
    let h = harness(settings()).await;

    h.client
        .handle_frame(position_frame(244660000, "FIRST NAME  ").as_bytes())
        .await
        .unwrap();
    let second = h
        .client
        .handle_frame(position_frame(244660000, "SECOND NAME").as_bytes())
        .await
        .unwrap();
    assert_eq!(
        second,
        FrameOutcome::Processed {
            mmsi: mmsi(244660000),
            new_vessel: false
        }
    );

    let store = h.store.read().await;
    assert_eq!(store.vessel_count().unwrap(), 1);
    assert_eq!(
        store.vessel(mmsi(244660000)).unwrap().unwrap().name.as_deref(),
        Some("FIRST NAME")
    );
    assert_eq!(store.position_count().unwrap(), 2);
}

#[tokio::test]
async fn test_broadcast_enabled() {
    let h = harness(settings()).await;

    h.client.handle_frame(TESTSHIP.as_bytes()).await.unwrap();
    h.client
        .handle_frame(position_frame(987654321, "OTHER").as_bytes())
        .await
        .unwrap();

    let sent = h.subscriber.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);

    let update: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(update["type"], "position_update");
    assert_eq!(update["data"].as_array().unwrap().len(), 1);
    assert_eq!(update["data"][0]["mmsi"], 123456789);
    assert_eq!(update["data"][0]["speed_over_ground"], 12.3);
    assert_eq!(h.client.stats().positions_broadcast, 2);
}

#[tokio::test]
async fn test_broadcast_disabled() {
    let h = harness(FeedSettings {
        broadcast_positions: false,
        ..settings()
    })
    .await;

    h.client.handle_frame(TESTSHIP.as_bytes()).await.unwrap();

    assert!(h.subscriber.sent.lock().unwrap().is_empty());
    assert_eq!(h.client.stats().positions_processed, 1);
    assert_eq!(h.client.stats().positions_broadcast, 0);
}

#[tokio::test]
async fn test_mistyped_fields_still_persisted() {
    let h = harness(settings()).await;

    let frames = [
        r#"{"MessageType":"PositionReport","MetaData":{"MMSI":111111111},"Message":{"PositionReport":{"Latitude":1.0,"Longitude":2.0,"NavigationalStatus":15.0}}}"#,
        r#"{"MessageType":"PositionReport","MetaData":{"MMSI":222222222,"ShipName":42},"Message":{"PositionReport":{"Latitude":3.0,"Longitude":4.0}}}"#,
        r#"{"MessageType":"PositionReport","MetaData":{"MMSI":333333333},"Message":{"PositionReport":{"Latitude":"n/a","Longitude":4.0}}}"#,
    ];
    for frame in frames {
        let outcome = h.client.handle_frame(frame.as_bytes()).await.unwrap();
        assert!(matches!(outcome, FrameOutcome::Processed { new_vessel: true, .. }));
    }

    let stats = h.client.stats();
    assert_eq!(stats.positions_processed, 3);
    assert_eq!(stats.decode_errors, 0);

    let store = h.store.read().await;
    assert_eq!(store.position_count().unwrap(), 3);
    assert_eq!(
        store.latest_position(mmsi(111111111)).unwrap().unwrap().nav_status,
        Some(15)
    );
    assert_eq!(store.vessel(mmsi(222222222)).unwrap().unwrap().name, None);
    let latest = store.latest_position(mmsi(333333333)).unwrap().unwrap();
    assert_eq!(latest.latitude, None);
    assert_eq!(latest.longitude, Some(4.0));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_subscriber_does_not_block_ingestion() {
    let h = harness(settings()).await;
    let stalled = h.registry.connect(Arc::new(StalledSink)).await;
    h.registry.subscribe(stalled, Topic::PositionUpdates).await;

    let outcome = tokio::time::timeout(
        Duration::from_secs(30),
        h.client.handle_frame(TESTSHIP.as_bytes()),
    )
    .await
    .expect("ingestion blocked by a stalled subscriber")
    .unwrap();
    assert!(matches!(outcome, FrameOutcome::Processed { .. }));

    assert!(!h.registry.is_connected(stalled).await);
    assert_eq!(h.registry.connection_count().await, 1);
    assert_eq!(h.subscriber.sent.lock().unwrap().len(), 1);

    // Later frames are not held up at all.
    let started = Instant::now();
    h.client
        .handle_frame(position_frame(987654321, "NEXT").as_bytes())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(h.subscriber.sent.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_persistence_failure_recovers() {
    let store = Arc::new(RwLock::new(FlakyStore {
        inner: MemoryStore::new(),
        failures: 1,
    }));
    let shared: SharedStore = store.clone();
    let client = StreamClient::with_connector(
        settings(),
        Arc::new(ScriptedConnector::default()),
        shared,
        Arc::new(SubscriberRegistry::new()),
    );

    let result = client.handle_frame(TESTSHIP.as_bytes()).await;
    assert!(matches!(result, Err(IngestError::Persistence(_))));

    let stats = client.stats();
    assert_eq!(stats.persistence_errors, 1);
    assert_eq!(stats.positions_processed, 0);
    assert!(store.read().await.vessel(mmsi(123456789)).unwrap().is_none());

    let outcome = client.handle_frame(TESTSHIP.as_bytes()).await.unwrap();
    assert_eq!(
        outcome,
        FrameOutcome::Processed {
            mmsi: mmsi(123456789),
            new_vessel: true
        }
    );
    assert_eq!(
        store.read().await.vessel(mmsi(123456789)).unwrap().unwrap().name.as_deref(),
        Some("TESTSHIP")
    );
    assert_eq!(client.stats().positions_processed, 1);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_without_credential() {
    let h = harness(FeedSettings::default()).await;

    h.client.start();

    let stats = h.client.stats();
    assert!(!stats.enabled);
    assert!(!stats.running);
    assert!(h.connector.attempts().is_empty());

    let (_stop_tx, stop_rx) = watch::channel(false);
    assert!(matches!(
        h.client.run(stop_rx).await,
        Err(IngestError::ConfigMissing)
    ));
    assert!(matches!(h.client.connect().await, Err(IngestError::ConfigMissing)));
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = harness(settings()).await;

    h.client.stop().await;
    h.client.stop().await;
    assert!(!h.client.stats().running);
    assert_eq!(h.client.state(), ConnectionState::Stopped);

    h.connector.push(&[], false);
    h.client.start();
    wait_until(|| h.client.state() == ConnectionState::Streaming).await;

    h.client.stop().await;
    h.client.stop().await;
    assert!(!h.client.stats().running);
    assert!(!h.client.stats().connected);
    assert_eq!(h.client.state(), ConnectionState::Stopped);
}

#[tokio::test]
async fn test_restart_while_stopping() {
    let h = harness(settings()).await;
    h.connector.push(&[], false);
    h.connector.push(&[], false);

    h.client.start();
    wait_until(|| h.client.state() == ConnectionState::Streaming).await;

    // Begin stopping, and start again before the old run has wound down.
    let stopping = h.client.stop();
    tokio::pin!(stopping);
    assert!(futures::poll!(&mut stopping).is_pending());
    h.client.start();

    tokio::time::timeout(Duration::from_secs(5), stopping)
        .await
        .expect("stop hung after a restart");

    wait_until(|| {
        h.connector.attempts().len() == 2 && h.client.state() == ConnectionState::Streaming
    })
    .await;
    assert!(h.client.is_running());

    h.client.stop().await;
    assert!(!h.client.is_running());
    assert_eq!(h.client.state(), ConnectionState::Stopped);
}

#[tokio::test]
async fn test_streams_frames_end_to_end() {
    let h = harness(settings()).await;
    h.connector
        .push(&[TESTSHIP, "garbage", &position_frame(987654321, "")], false);

    h.client.start();
    h.client.start();
    wait_until(|| h.client.stats().positions_processed == 2).await;

    let stats = h.client.stats();
    assert!(stats.enabled);
    assert!(stats.running);
    assert!(stats.connected);
    assert_eq!(stats.state, ConnectionState::Streaming);
    assert_eq!(stats.messages_received, 3);
    assert_eq!(stats.decode_errors, 1);
    assert_eq!(stats.connect_attempts, 1);

    let sent = h.connector.sent();
    assert_eq!(sent.len(), 1);
    let subscription: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(subscription["APIKey"], "test-key");
    assert_eq!(
        subscription["BoundingBoxes"],
        serde_json::json!([[[-90.0, -180.0], [90.0, 180.0]]])
    );

    assert_eq!(
        h.store.read().await.vessel(mmsi(987654321)).unwrap().unwrap().name,
        None
    );

    h.client.stop().await;
    assert!(!h.client.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff() {
    let h = harness(settings()).await;

    h.client.start();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.connector.attempts().len(), 1);
    assert_eq!(h.client.state(), ConnectionState::Backoff);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let attempts = h.connector.attempts();
    assert_eq!(attempts.len(), 2);
    assert!(attempts[1] - attempts[0] >= Duration::from_secs(5));

    h.client.stop().await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.attempts().len(), 2);
    assert_eq!(h.client.stats().connect_attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_close() {
    let h = harness(settings()).await;
    h.connector.push(&[TESTSHIP], true);
    h.connector.push(&[TESTSHIP], false);

    h.client.start();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.client.state(), ConnectionState::Backoff);
    assert_eq!(h.client.stats().positions_processed, 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.client.state(), ConnectionState::Streaming);
    assert_eq!(h.client.stats().positions_processed, 2);
    assert_eq!(h.connector.sent().len(), 2);

    h.client.stop().await;
    assert_eq!(h.client.state(), ConnectionState::Stopped);
}
