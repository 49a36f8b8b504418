//! JSON codec for feed and subscriber frames.
//!
//! The feed sends JSON objects over WebSocket text (and occasionally binary)
//! frames. A frame is either a data envelope or an error object of the form
//! `{"error": "..."}`.

use serde_json::Value;
use thiserror::Error;

use crate::messages::{FeedEnvelope, FeedMessage, SubscriberMessage, SubscriptionRequest};

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The frame is not valid JSON or does not match the envelope shape.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is valid JSON but not an object.
    #[error("expected a JSON object")]
    NotAnObject,
}

/// Decode one inbound feed frame.
pub fn decode_feed_message(raw: &[u8]) -> Result<FeedMessage, CodecError> {
    let value: Value = serde_json::from_slice(raw)?;
    let Value::Object(map) = &value else {
        return Err(CodecError::NotAnObject);
    };

    if let Some(error) = map.get("error") {
        let text = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Ok(FeedMessage::Error(text));
    }

    let envelope: FeedEnvelope = serde_json::from_value(value)?;
    Ok(FeedMessage::Envelope(envelope))
}

/// Encode the subscription frame sent after connecting.
pub fn encode_subscription(request: &SubscriptionRequest) -> Result<String, CodecError> {
    serde_json::to_string(request).map_err(CodecError::from)
}

/// Encode a message for local subscribers.
pub fn encode_subscriber_message(msg: &SubscriberMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(CodecError::from)
}
