//! Message extraction.
//!
//! Turns a decoded [`FeedEnvelope`] into a normalized [`PositionReport`] and,
//! on the first sighting of a vessel, a [`VesselSummary`] upsert candidate.

use std::collections::HashSet;

use aisrelay_core::{Mmsi, PositionReport, VesselSummary};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::messages::FeedEnvelope;

/// Reasons an envelope cannot become a position report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing MMSI")]
    MissingMmsi,

    #[error("invalid MMSI: {0}")]
    InvalidMmsi(i64),
}

/// Output of [`Extractor::extract`].
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub report: PositionReport,

    /// Present only on the first sighting of this MMSI.
    pub vessel: Option<VesselSummary>,
}

/// Stateful extractor remembering which vessels have been seen.
#[derive(Debug, Default)]
pub struct Extractor {
    seen: HashSet<Mmsi>,
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract a report stamped with `received_at`.
    ///
    /// Numeric fields pass through unmodified, including absent ones.
    pub fn extract(
        &mut self,
        envelope: &FeedEnvelope,
        received_at: DateTime<Utc>,
    ) -> Result<Extraction, ValidationError> {
        let meta = envelope.meta_data.as_ref();
        let raw_mmsi = meta
            .and_then(|m| m.mmsi)
            .ok_or(ValidationError::MissingMmsi)?;
        let mmsi = Mmsi::try_from(raw_mmsi).map_err(ValidationError::InvalidMmsi)?;

        let mut report = PositionReport::new(mmsi, received_at);
        if let Some(payload) = envelope
            .message
            .as_ref()
            .and_then(|body| body.position_report.as_ref())
        {
            report.latitude = payload.latitude;
            report.longitude = payload.longitude;
            report.speed_over_ground = payload.sog;
            report.course_over_ground = payload.cog;
            report.heading = payload.true_heading;
            report.nav_status = payload.navigational_status;
        }

        let vessel = self.seen.insert(mmsi).then(|| {
            let name = meta
                .and_then(|m| m.ship_name.as_deref())
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string);
            VesselSummary::new(mmsi, name)
        });

        Ok(Extraction { report, vessel })
    }

    /// Un-mark a vessel so its next sighting yields a candidate again.
    pub fn forget(&mut self, mmsi: Mmsi) -> bool {
        self.seen.remove(&mmsi)
    }

    /// Number of distinct vessels seen.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}
