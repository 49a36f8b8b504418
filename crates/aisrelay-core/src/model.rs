//! AIS data model types.
//!
//! These types represent what the relay stores and serves:
//! - Position reports, one per accepted feed frame
//! - Vessel summaries keyed by MMSI
//! - Bounding boxes scoping feed subscriptions and queries

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag stored on every report ingested from aisstream.io.
pub const DATA_SOURCE_AISSTREAM: &str = "aisstream";

/// Maritime Mobile Service Identity.
///
/// Always positive. Construct with [`Mmsi::new`] or `TryFrom<i64>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mmsi(u64);

impl Mmsi {
    /// Returns `None` for zero.
    pub fn new(value: u64) -> Option<Self> {
        (value > 0).then_some(Self(value))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<i64> for Mmsi {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u64::try_from(value)
            .ok()
            .and_then(Mmsi::new)
            .ok_or(value)
    }
}

impl fmt::Display for Mmsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Mmsi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .ok()
            .and_then(Mmsi::new)
            .ok_or_else(|| format!("invalid MMSI: {s}"))
    }
}

/// A single vessel telemetry sample.
///
/// Reports are append-only: every accepted frame becomes a new record,
/// never merged with earlier reports for the same vessel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub mmsi: Mmsi,

    /// Degrees. The feed may omit it or send an out-of-range sentinel.
    pub latitude: Option<f64>,

    /// Degrees. The feed may omit it or send an out-of-range sentinel.
    pub longitude: Option<f64>,

    /// Ingestion time, not the transponder's own timestamp.
    pub timestamp: DateTime<Utc>,

    /// Knots.
    pub speed_over_ground: Option<f64>,

    /// Degrees.
    pub course_over_ground: Option<f64>,

    /// True heading in degrees.
    pub heading: Option<f64>,

    /// AIS navigational status code (0-15).
    pub nav_status: Option<i32>,

    pub destination: Option<String>,

    pub data_source: String,
}

impl PositionReport {
    /// Create a report with no telemetry fields set.
    pub fn new(mmsi: Mmsi, timestamp: DateTime<Utc>) -> Self {
        Self {
            mmsi,
            latitude: None,
            longitude: None,
            timestamp,
            speed_over_ground: None,
            course_over_ground: None,
            heading: None,
            nav_status: None,
            destination: None,
            data_source: DATA_SOURCE_AISSTREAM.to_string(),
        }
    }

    /// Both coordinates, if present.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

/// Static particulars of a vessel.
///
/// Created on first sighting of an MMSI. `name` is set once and never
/// overwritten by a later, possibly different, value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselSummary {
    pub mmsi: Mmsi,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vessel_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub imo: Option<u32>,

    /// Metres.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length_overall: Option<f64>,

    /// Metres.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beam: Option<f64>,

    /// Tonnes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadweight: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl VesselSummary {
    /// A summary carrying only the identity and, if known, the name.
    pub fn new(mmsi: Mmsi, name: Option<String>) -> Self {
        Self {
            mmsi,
            name,
            vessel_type: None,
            callsign: None,
            imo: None,
            length_overall: None,
            beam: None,
            deadweight: None,
            destination: None,
        }
    }
}

/// A geographic rectangle.
///
/// On the wire this is `[[lat_min, lon_min], [lat_max, lon_max]]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[[f64; 2]; 2]", into = "[[f64; 2]; 2]")]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lon_min: f64,
    pub lat_max: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    pub fn new(lat_min: f64, lon_min: f64, lat_max: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lon_min,
            lat_max,
            lon_max,
        }
    }

    /// The whole globe.
    pub fn world() -> Self {
        Self::new(-90.0, -180.0, 90.0, 180.0)
    }

    /// Inclusive on all edges.
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.lat_min
            && latitude <= self.lat_max
            && longitude >= self.lon_min
            && longitude <= self.lon_max
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::world()
    }
}

impl From<[[f64; 2]; 2]> for BoundingBox {
    fn from(corners: [[f64; 2]; 2]) -> Self {
        let [[lat_min, lon_min], [lat_max, lon_max]] = corners;
        Self::new(lat_min, lon_min, lat_max, lon_max)
    }
}

impl From<BoundingBox> for [[f64; 2]; 2] {
    fn from(bbox: BoundingBox) -> Self {
        [[bbox.lat_min, bbox.lon_min], [bbox.lat_max, bbox.lon_max]]
    }
}

/// Parses the query-string form `"lat_min,lon_min,lat_max,lon_max"`.
impl FromStr for BoundingBox {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid bbox {s:?}: {e}"))?;

        match values.as_slice() {
            [lat_min, lon_min, lat_max, lon_max] => {
                Ok(Self::new(*lat_min, *lon_min, *lat_max, *lon_max))
            }
            _ => Err(format!("invalid bbox {s:?}: expected 4 values")),
        }
    }
}
