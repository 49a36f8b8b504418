//! Vessel store.
//!
//! The store is the persistence gateway the ingestion pipeline writes
//! through, and the source the read API queries. Writes are append-only
//! for positions and insert-once for vessels.
//!
//! Two implementations exist: [`MemoryStore`] and the durable
//! [`SqliteStore`](crate::sqlite::SqliteStore).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{BoundingBox, Mmsi, PositionReport, VesselSummary};

/// Errors raised by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write was rejected.
    #[error("write failed: {0}")]
    WriteFailed(String),
}

/// Filter and paging for [`VesselStore::latest_positions`].
#[derive(Debug, Clone, PartialEq)]
pub struct VesselQuery {
    /// Only vessels whose latest position falls inside this box.
    pub bbox: Option<BoundingBox>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for VesselQuery {
    fn default() -> Self {
        Self {
            bbox: None,
            limit: 100,
            offset: 0,
        }
    }
}

/// One vessel with its most recent report.
#[derive(Debug, Clone, PartialEq)]
pub struct VesselPosition {
    pub vessel: Option<VesselSummary>,
    pub latest: PositionReport,
}

/// A page of [`VesselPosition`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct VesselPage {
    /// Distinct vessels with at least one position, before filtering.
    pub total: usize,
    pub vessels: Vec<VesselPosition>,
}

/// Trait for vessel storage implementations.
///
/// Implementations must keep upsert-then-append for one MMSI serializable;
/// callers hold a single write guard across both calls.
pub trait VesselStore: Send + Sync {
    /// Insert a vessel if the MMSI is unseen. Returns `true` on insert.
    ///
    /// An existing name is never overwritten. A missing name is filled in
    /// when one becomes known.
    fn upsert_vessel(&mut self, mmsi: Mmsi, name: Option<&str>) -> Result<bool, StoreError>;

    /// Append one report. No deduplication: repeated or stale reports
    /// still become new rows.
    fn append_position(&mut self, report: &PositionReport) -> Result<(), StoreError>;

    /// Get a vessel by MMSI.
    fn vessel(&self, mmsi: Mmsi) -> Result<Option<VesselSummary>, StoreError>;

    /// Get the report with the newest timestamp for a vessel. Ties go to
    /// the last appended report.
    fn latest_position(&self, mmsi: Mmsi) -> Result<Option<PositionReport>, StoreError>;

    /// Latest report per vessel, ordered by MMSI.
    fn latest_positions(&self, query: &VesselQuery) -> Result<VesselPage, StoreError>;

    /// Reports for a vessel at or after `since`, oldest first.
    fn track(&self, mmsi: Mmsi, since: DateTime<Utc>) -> Result<Vec<PositionReport>, StoreError>;

    /// Number of known vessels.
    fn vessel_count(&self) -> Result<usize, StoreError>;

    /// Number of stored reports across all vessels.
    fn position_count(&self) -> Result<usize, StoreError>;
}

/// In-memory vessel store.
///
/// Contents are lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    vessels: BTreeMap<Mmsi, VesselSummary>,
    positions: BTreeMap<Mmsi, Vec<PositionReport>>,
    position_count: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VesselStore for MemoryStore {
    fn upsert_vessel(&mut self, mmsi: Mmsi, name: Option<&str>) -> Result<bool, StoreError> {
        match self.vessels.get_mut(&mmsi) {
            Some(existing) => {
                if existing.name.is_none() {
                    existing.name = name.map(str::to_string);
                }
                Ok(false)
            }
            None => {
                self.vessels
                    .insert(mmsi, VesselSummary::new(mmsi, name.map(str::to_string)));
                Ok(true)
            }
        }
    }

    fn append_position(&mut self, report: &PositionReport) -> Result<(), StoreError> {
        self.positions
            .entry(report.mmsi)
            .or_default()
            .push(report.clone());
        self.position_count += 1;
        Ok(())
    }

    fn vessel(&self, mmsi: Mmsi) -> Result<Option<VesselSummary>, StoreError> {
        Ok(self.vessels.get(&mmsi).cloned())
    }

    fn latest_position(&self, mmsi: Mmsi) -> Result<Option<PositionReport>, StoreError> {
        Ok(self.positions.get(&mmsi).and_then(|p| newest(p)).cloned())
    }

    fn latest_positions(&self, query: &VesselQuery) -> Result<VesselPage, StoreError> {
        let total = self.positions.len();

        let vessels = self
            .positions
            .iter()
            .filter_map(|(mmsi, reports)| newest(reports).map(|latest| (mmsi, latest)))
            .filter(|(_, latest)| match (&query.bbox, latest.coordinates()) {
                (None, _) => true,
                (Some(bbox), Some((lat, lon))) => bbox.contains(lat, lon),
                (Some(_), None) => false,
            })
            .skip(query.offset)
            .take(query.limit)
            .map(|(mmsi, latest)| VesselPosition {
                vessel: self.vessels.get(mmsi).cloned(),
                latest: latest.clone(),
            })
            .collect();

        Ok(VesselPage { total, vessels })
    }

    fn track(&self, mmsi: Mmsi, since: DateTime<Utc>) -> Result<Vec<PositionReport>, StoreError> {
        let mut track: Vec<PositionReport> = self
            .positions
            .get(&mmsi)
            .map(|reports| {
                reports
                    .iter()
                    .filter(|r| r.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // Appends are not required to arrive in timestamp order.
        track.sort_by_key(|r| r.timestamp);
        Ok(track)
    }

    fn vessel_count(&self) -> Result<usize, StoreError> {
        Ok(self.vessels.len())
    }

    fn position_count(&self) -> Result<usize, StoreError> {
        Ok(self.position_count)
    }
}

/// Newest report by timestamp; ties go to the last appended.
pub(crate) fn newest(reports: &[PositionReport]) -> Option<&PositionReport> {
    reports.iter().max_by_key(|r| r.timestamp)
}
