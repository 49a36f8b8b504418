//! # aisrelay-server
//!
//! Local fan-out of position updates.
//!
//! - [`SubscriberRegistry`] tracks connected subscribers and their topics and
//!   broadcasts to them, dropping any subscriber whose send fails or stalls.
//! - [`SubscriberServer`] accepts WebSocket clients on
//!   `/ws/vessels/positions` and registers them.

pub mod registry;
pub mod server;

pub use registry::{
    BroadcastOutcome, ConnectionId, SinkError, SubscriberRegistry, SubscriberSink, Topic,
    DEFAULT_SEND_TIMEOUT,
};
pub use server::{ServerConfig, SubscriberServer, POSITIONS_PATH};
