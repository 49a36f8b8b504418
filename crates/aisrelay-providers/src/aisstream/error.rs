//! Ingestion errors.

use aisrelay_core::StoreError;
use aisrelay_protocol::{CodecError, ValidationError};
use thiserror::Error;

use super::transport::FeedError;

/// Everything that can go wrong between the feed and the store.
///
/// None of these escape the ingestion task; they are logged and counted.
#[derive(Debug, Error)]
pub enum IngestError {
    /// No API key configured. Ingestion stays disabled.
    #[error("aisstream.io API key not configured")]
    ConfigMissing,

    #[error("transport: {0}")]
    Transport(#[from] FeedError),

    #[error("decode: {0}")]
    Decode(#[from] CodecError),

    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("persistence: {0}")]
    Persistence(#[from] StoreError),
}
