//! # aisrelay-providers
//!
//! Data providers for the relay.
//!
//! Currently one provider: the aisstream.io streaming client, which keeps a
//! persistent subscription open, persists every position report and fans
//! it out to local subscribers.

pub mod aisstream;

pub use aisstream::{
    ConnectionState, FeedConnector, FeedError, FeedStream, FrameOutcome, IngestError,
    IngestStats, SharedStore, StatsSnapshot, StreamClient, WsFeedConnector,
};
