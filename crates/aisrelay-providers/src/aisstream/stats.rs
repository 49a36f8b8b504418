//! Ingestion statistics.
//!
//! Counters are monotonic for the lifetime of the process and updated with
//! relaxed atomics from the ingestion task. [`IngestStats::snapshot`] can be
//! called from any task without coordination.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Stream client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
    Backoff,
    Stopped,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Streaming,
            3 => ConnectionState::Backoff,
            4 => ConnectionState::Stopped,
            _ => ConnectionState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Streaming => 2,
            ConnectionState::Backoff => 3,
            ConnectionState::Stopped => 4,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Backoff => "backoff",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the ingestion counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// A credential is configured.
    pub enabled: bool,
    pub connected: bool,
    pub running: bool,
    pub state: ConnectionState,
    pub messages_received: u64,
    pub positions_processed: u64,
    pub positions_broadcast: u64,
    pub decode_errors: u64,
    pub persistence_errors: u64,
    pub connect_attempts: u64,
    pub uptime_secs: u64,
}

/// Collects ingestion statistics.
pub struct IngestStats {
    start_time: Instant,
    enabled: AtomicBool,
    connected: AtomicBool,
    running: AtomicBool,
    state: AtomicU8,
    messages_received: AtomicU64,
    positions_processed: AtomicU64,
    positions_broadcast: AtomicU64,
    decode_errors: AtomicU64,
    persistence_errors: AtomicU64,
    connect_attempts: AtomicU64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            enabled: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            running: AtomicBool::new(false),
            state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            messages_received: AtomicU64::new(0),
            positions_processed: AtomicU64::new(0),
            positions_broadcast: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            persistence_errors: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a persisted position. Returns the new total.
    pub fn record_position(&self) -> u64 {
        self.positions_processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_broadcast(&self) {
        self.positions_broadcast.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_error(&self) {
        self.persistence_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enabled: self.enabled.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            state: self.state(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            positions_processed: self.positions_processed.load(Ordering::Relaxed),
            positions_broadcast: self.positions_broadcast.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            persistence_errors: self.persistence_errors.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}
