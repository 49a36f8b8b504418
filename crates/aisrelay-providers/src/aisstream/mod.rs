//! aisstream.io provider.
//!
//! - [`client`]: the reconnecting stream client and ingestion pipeline
//! - [`transport`]: the feed connection abstraction and its WebSocket implementation
//! - [`stats`]: lock-free ingestion counters
//! - [`error`]: ingestion error taxonomy

pub mod client;
pub mod error;
pub mod stats;
pub mod transport;

pub use client::{FrameOutcome, SharedStore, StreamClient};
pub use error::IngestError;
pub use stats::{ConnectionState, IngestStats, StatsSnapshot};
pub use transport::{FeedConnector, FeedError, FeedStream, WsFeedConnector};
