//! Protocol message types.
//!
//! This module defines all messages crossing the relay boundary:
//! - Relay → aisstream.io: SubscriptionRequest
//! - aisstream.io → Relay: FeedEnvelope, or an error object
//! - Relay → Subscriber: SubscriberMessage (position updates)
//!
//! All messages are JSON over WebSocket frames.

use aisrelay_core::{BoundingBox, PositionReport};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ============================================================================
// Feed (aisstream.io)
// ============================================================================

/// Message type tag for position reports.
pub const POSITION_REPORT: &str = "PositionReport";

/// Subscription frame sent right after connecting.
///
/// # Example
/// ```json
/// {
///   "APIKey": "<key>",
///   "BoundingBoxes": [[[-90, -180], [90, 180]]]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    #[serde(rename = "APIKey")]
    pub api_key: String,

    #[serde(rename = "BoundingBoxes")]
    pub bounding_boxes: Vec<BoundingBox>,

    #[serde(
        rename = "FilterMessageTypes",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub filter_message_types: Vec<String>,
}

impl SubscriptionRequest {
    pub fn new(api_key: impl Into<String>, bounding_boxes: Vec<BoundingBox>) -> Self {
        Self {
            api_key: api_key.into(),
            bounding_boxes,
            filter_message_types: Vec::new(),
        }
    }

    /// Restrict the feed to the given message types.
    pub fn with_message_types(mut self, types: Vec<String>) -> Self {
        self.filter_message_types = types;
        self
    }
}

/// A decoded inbound feed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// The feed reported an error, e.g. an invalid key or a rate limit.
    Error(String),

    /// A regular data envelope.
    Envelope(FeedEnvelope),
}

/// Data envelope as delivered by aisstream.io.
///
/// Only the fields the relay uses are modelled; everything else is ignored.
/// `MMSI` is the only strictly typed field: any other field whose JSON type
/// does not match decodes as `None` instead of failing the frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedEnvelope {
    #[serde(rename = "MessageType", default, deserialize_with = "lenient")]
    pub message_type: Option<String>,

    #[serde(rename = "MetaData", default)]
    pub meta_data: Option<FeedMetaData>,

    #[serde(rename = "Message", default, deserialize_with = "lenient")]
    pub message: Option<FeedMessageBody>,
}

impl FeedEnvelope {
    pub fn is_position_report(&self) -> bool {
        self.message_type.as_deref() == Some(POSITION_REPORT)
    }
}

/// Metadata block common to all feed messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedMetaData {
    #[serde(rename = "MMSI", default)]
    pub mmsi: Option<i64>,

    #[serde(rename = "ShipName", default, deserialize_with = "lenient")]
    pub ship_name: Option<String>,
}

/// Type-specific payloads. Only position reports are modelled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedMessageBody {
    #[serde(rename = "PositionReport", default, deserialize_with = "lenient")]
    pub position_report: Option<PositionReportPayload>,
}

/// AIS position report payload (message types 1, 2 and 3).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionReportPayload {
    #[serde(rename = "Latitude", default, deserialize_with = "lenient")]
    pub latitude: Option<f64>,

    #[serde(rename = "Longitude", default, deserialize_with = "lenient")]
    pub longitude: Option<f64>,

    #[serde(rename = "Sog", default, deserialize_with = "lenient")]
    pub sog: Option<f64>,

    #[serde(rename = "Cog", default, deserialize_with = "lenient")]
    pub cog: Option<f64>,

    #[serde(rename = "TrueHeading", default, deserialize_with = "lenient")]
    pub true_heading: Option<f64>,

    #[serde(rename = "NavigationalStatus", default, deserialize_with = "lenient_code")]
    pub navigational_status: Option<i32>,
}

/// Decode an optional field, mapping a type mismatch to `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Like [`lenient`], but also accepts integral floats such as `15.0`.
fn lenient_code<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if let Some(code) = value.as_i64() {
        return Ok(i32::try_from(code).ok());
    }
    Ok(value
        .as_f64()
        .filter(|code| code.fract() == 0.0)
        .and_then(|code| i32::try_from(code as i64).ok()))
}

// ============================================================================
// Subscriber protocol (push only)
// ============================================================================

/// Messages pushed to local subscribers.
///
/// # Example
/// ```json
/// {
///   "type": "position_update",
///   "timestamp": "2024-01-17T10:30:00.000Z",
///   "data": [{ "mmsi": 244660000, "latitude": 52.1, ... }]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriberMessage {
    PositionUpdate {
        /// Time the update was built, ISO 8601.
        timestamp: String,
        data: Vec<PositionReport>,
    },
}

impl SubscriberMessage {
    /// Build a position update stamped with the current time.
    pub fn position_update(data: Vec<PositionReport>) -> Self {
        SubscriberMessage::PositionUpdate {
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            data,
        }
    }
}
