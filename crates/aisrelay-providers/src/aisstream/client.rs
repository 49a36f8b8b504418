//! aisstream.io stream client.
//!
//! One supervised task keeps a subscription to the feed open:
//!
//! ```text
//! Disconnected -> Connecting -> Streaming -> Backoff -> Disconnected
//!                                  (any) -> Stopped
//! ```
//!
//! Every frame goes through [`StreamClient::handle_frame`]: decode, extract,
//! persist, broadcast. Persistence happens inline, so a slow store slows
//! down consumption of the feed rather than buffering.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use aisrelay_core::{FeedSettings, Mmsi, StoreError, VesselStore};
use aisrelay_protocol::{
    decode_feed_message, encode_subscription, Extraction, Extractor, FeedMessage,
    SubscriptionRequest,
};
use aisrelay_server::SubscriberRegistry;
use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::error::IngestError;
use super::stats::{ConnectionState, IngestStats, StatsSnapshot};
use super::transport::{FeedConnector, FeedError, FeedStream, WsFeedConnector};

/// Store shared between the ingestion task and the read API.
pub type SharedStore = Arc<RwLock<dyn VesselStore>>;

/// Log a progress line every this many persisted positions.
const PROGRESS_INTERVAL: u64 = 100;

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// A position report was persisted.
    Processed { mmsi: Mmsi, new_vessel: bool },

    /// Valid frame of a type the relay does not handle.
    Ignored,

    /// The feed sent an error object.
    FeedError(String),
}

/// The spawned ingestion task and its own stop flag.
struct RunHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Reconnecting client for the aisstream.io feed.
pub struct StreamClient {
    settings: FeedSettings,
    connector: Arc<dyn FeedConnector>,
    store: SharedStore,
    registry: Arc<SubscriberRegistry>,
    stats: Arc<IngestStats>,
    extractor: Mutex<Extractor>,
    current: StdMutex<Option<RunHandle>>,
}

impl StreamClient {
    /// Create a client connecting over WebSocket.
    pub fn new(
        settings: FeedSettings,
        store: SharedStore,
        registry: Arc<SubscriberRegistry>,
    ) -> Self {
        Self::with_connector(settings, Arc::new(WsFeedConnector), store, registry)
    }

    pub fn with_connector(
        settings: FeedSettings,
        connector: Arc<dyn FeedConnector>,
        store: SharedStore,
        registry: Arc<SubscriberRegistry>,
    ) -> Self {
        let stats = Arc::new(IngestStats::new());
        stats.set_enabled(settings.credential().is_some());

        Self {
            settings,
            connector,
            store,
            registry,
            stats,
            extractor: Mutex::new(Extractor::new()),
            current: StdMutex::new(None),
        }
    }

    /// Current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared handle to the live counters.
    pub fn stats_handle(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.stats.state()
    }

    pub fn is_running(&self) -> bool {
        self.stats.is_running()
    }

    /// Spawn the ingestion task.
    ///
    /// Without a credential ingestion stays disabled and this returns
    /// immediately. Calling it while the task is alive does nothing.
    pub fn start(self: &Arc<Self>) {
        if self.settings.credential().is_none() {
            warn!("AISSTREAM_API_KEY not set, AIS ingestion disabled");
            self.stats.set_enabled(false);
            return;
        }
        self.stats.set_enabled(true);

        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|run| !run.task.is_finished()) {
            debug!("Stream client already running");
            return;
        }

        // Every run gets its own flag, so a stop still in progress for an
        // earlier run cannot be undone by this one.
        let (stop_tx, stop_rx) = watch::channel(false);
        self.stats.set_running(true);

        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            if let Err(e) = client.run(stop_rx).await {
                error!(error = %e, "Stream client terminated");
            }
        });
        *current = Some(RunHandle { stop_tx, task });
        info!("AIS stream client started");
    }

    /// Stop the ingestion task and wait for it to finish.
    ///
    /// Safe to call repeatedly and before [`start`](Self::start). Once this
    /// returns the stopped run makes no further reconnect attempt.
    pub async fn stop(&self) {
        let current = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(RunHandle { stop_tx, task }) = current {
            stop_tx.send_replace(true);
            if let Err(e) = task.await {
                warn!(error = %e, "Stream client task did not finish cleanly");
            }
            info!("AIS stream client stopped");
        }

        // A start() that raced this stop owns the stats now.
        if self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
        {
            self.stats.set_running(false);
            self.stats.set_connected(false);
            self.stats.set_state(ConnectionState::Stopped);
        }
    }

    /// Supervise connect and receive until `stop_rx` turns `true` or its
    /// sender is dropped.
    ///
    /// Returns `Err` only for [`IngestError::ConfigMissing`]; every other
    /// failure leads to a backoff and a new attempt.
    pub async fn run(&self, mut stop_rx: watch::Receiver<bool>) -> Result<(), IngestError> {
        let result = loop {
            if is_stopped(&stop_rx) {
                break Ok(());
            }
            self.stats.set_running(true);

            let connected = tokio::select! {
                biased;
                _ = wait_for_stop(&mut stop_rx) => break Ok(()),
                result = self.connect() => result,
            };

            match connected {
                Ok(mut stream) => {
                    match self.receive_loop(&mut *stream, &mut stop_rx).await {
                        Ok(()) => debug!("Receive loop stopped"),
                        Err(e) => warn!(error = %e, "AIS stream connection lost"),
                    }
                    stream.close().await;
                }
                Err(IngestError::ConfigMissing) => {
                    self.stats.set_enabled(false);
                    break Err(IngestError::ConfigMissing);
                }
                Err(e) => warn!(error = %e, "AIS stream connection failed"),
            }

            if is_stopped(&stop_rx) {
                break Ok(());
            }

            self.stats.set_connected(false);
            self.stats.set_state(ConnectionState::Backoff);
            if !self.backoff(&mut stop_rx).await {
                break Ok(());
            }
            self.stats.set_state(ConnectionState::Disconnected);
        };

        if !self.superseded(&stop_rx) {
            self.stats.set_connected(false);
            self.stats.set_running(false);
            self.stats.set_state(ConnectionState::Stopped);
        }
        result
    }

    /// Whether a later [`start`](Self::start) has replaced the run that
    /// listens on `stop_rx`.
    fn superseded(&self, stop_rx: &watch::Receiver<bool>) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|run| !run.stop_tx.subscribe().same_channel(stop_rx))
    }

    /// Open the feed connection and send the subscription frame.
    pub async fn connect(&self) -> Result<Box<dyn FeedStream>, IngestError> {
        let api_key = self
            .settings
            .credential()
            .ok_or(IngestError::ConfigMissing)?;

        self.stats.set_state(ConnectionState::Connecting);
        self.stats.record_connect_attempt();

        let mut stream = self.connector.connect(&self.settings.url).await?;

        let request = SubscriptionRequest::new(api_key, self.settings.bounding_boxes.clone())
            .with_message_types(self.settings.message_types.clone());
        let frame = encode_subscription(&request)?;
        if let Err(e) = stream.send_text(frame).await {
            stream.close().await;
            return Err(e.into());
        }

        self.stats.set_connected(true);
        self.stats.set_state(ConnectionState::Streaming);
        info!(
            url = %self.settings.url,
            boxes = request.bounding_boxes.len(),
            "Subscribed to aisstream.io"
        );
        Ok(stream)
    }

    /// Consume frames until the connection ends or a stop is requested.
    ///
    /// `Ok(())` means stopped; `Err` means the transport failed or closed.
    async fn receive_loop(
        &self,
        stream: &mut dyn FeedStream,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), FeedError> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = wait_for_stop(stop_rx) => return Ok(()),
                frame = stream.next_frame() => frame,
            };

            let raw = match frame {
                Some(Ok(raw)) => raw,
                Some(Err(e)) => return Err(e),
                None => return Err(FeedError::Closed),
            };

            match self.handle_frame(&raw).await {
                Ok(outcome) => trace!(?outcome, "Frame handled"),
                Err(IngestError::Validation(e)) => trace!(error = %e, "Dropped position report"),
                Err(e @ IngestError::Decode(_)) => warn!(error = %e, "Undecodable frame"),
                Err(e) => error!(error = %e, "Failed to ingest position report"),
            }
        }
    }

    /// Wait out the reconnect delay. Returns `false` if stopped meanwhile.
    async fn backoff(&self, stop_rx: &mut watch::Receiver<bool>) -> bool {
        let delay = Duration::from_secs(self.settings.reconnect_delay_secs);
        info!(delay_secs = delay.as_secs(), "Reconnecting after delay");

        tokio::select! {
            biased;
            _ = wait_for_stop(stop_rx) => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Run one raw frame through the pipeline.
    pub async fn handle_frame(&self, raw: &[u8]) -> Result<FrameOutcome, IngestError> {
        self.stats.record_message();

        let envelope = match decode_feed_message(raw) {
            Ok(FeedMessage::Envelope(envelope)) => envelope,
            Ok(FeedMessage::Error(text)) => {
                warn!(error = %text, "aisstream.io reported an error");
                return Ok(FrameOutcome::FeedError(text));
            }
            Err(e) => {
                self.stats.record_decode_error();
                return Err(e.into());
            }
        };

        if !envelope.is_position_report() {
            trace!(message_type = ?envelope.message_type, "Ignoring message");
            return Ok(FrameOutcome::Ignored);
        }

        let extraction = self.extractor.lock().await.extract(&envelope, Utc::now())?;
        let mmsi = extraction.report.mmsi;

        let persisted = {
            let mut store = self.store.write().await;
            persist(&mut *store, &extraction)
        };
        let new_vessel = match persisted {
            Ok(inserted) => inserted,
            Err(e) => {
                self.stats.record_persistence_error();
                if extraction.vessel.is_some() {
                    self.extractor.lock().await.forget(mmsi);
                }
                return Err(e.into());
            }
        };

        if new_vessel {
            debug!(%mmsi, name = ?extraction.vessel.as_ref().and_then(|v| v.name.as_deref()), "New vessel");
        }

        let total = self.stats.record_position();
        if total % PROGRESS_INTERVAL == 0 {
            info!(total, "Processed AIS positions");
        }

        if self.settings.broadcast_positions {
            let outcome = self
                .registry
                .broadcast_position_update(std::slice::from_ref(&extraction.report))
                .await;
            self.stats.record_broadcast();
            trace!(delivered = outcome.delivered, removed = outcome.removed, "Broadcast");
        }

        Ok(FrameOutcome::Processed { mmsi, new_vessel })
    }
}

/// Upsert the vessel on first sighting, then append the report.
fn persist(store: &mut dyn VesselStore, extraction: &Extraction) -> Result<bool, StoreError> {
    let inserted = match &extraction.vessel {
        Some(vessel) => store.upsert_vessel(vessel.mmsi, vessel.name.as_deref())?,
        None => false,
    };
    store.append_position(&extraction.report)?;
    Ok(inserted)
}

fn is_stopped(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow() || rx.has_changed().is_err()
}

/// Resolves once the stop flag is set.
async fn wait_for_stop(rx: &mut watch::Receiver<bool>) {
    loop {
        let stopped = *rx.borrow_and_update();
        if stopped || rx.changed().await.is_err() {
            return;
        }
    }
}
