//! SQLite-backed vessel store.
//!
//! Two tables, `vessels` (one row per MMSI) and `vessel_positions`
//! (append-only). Timestamps are stored as UTC nanoseconds since the epoch
//! so they round-trip exactly and order numerically.

use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::model::{Mmsi, PositionReport, VesselSummary};
use crate::store::{StoreError, VesselPage, VesselPosition, VesselQuery, VesselStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS vessels (
    mmsi            INTEGER PRIMARY KEY,
    vessel_name     TEXT,
    vessel_type     TEXT,
    callsign        TEXT,
    imo             INTEGER,
    length_overall  REAL,
    beam            REAL,
    deadweight      INTEGER,
    destination     TEXT
);

CREATE TABLE IF NOT EXISTS vessel_positions (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    mmsi                INTEGER NOT NULL,
    latitude            REAL,
    longitude           REAL,
    timestamp           INTEGER NOT NULL,
    speed_over_ground   REAL,
    course_over_ground  REAL,
    heading             REAL,
    nav_status          INTEGER,
    destination         TEXT,
    data_source         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_vessel_positions_mmsi_ts
    ON vessel_positions (mmsi, timestamp);
";

const POSITION_COLUMNS: &str = "mmsi, latitude, longitude, timestamp, speed_over_ground, \
     course_over_ground, heading, nav_status, destination, data_source";

/// Durable [`VesselStore`] in a single SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))?;
        Self::with_connection(conn)
    }

    /// A private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(unavailable)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn vessel_with(conn: &Connection, mmsi: Mmsi) -> Result<Option<VesselSummary>, StoreError> {
        conn.query_row(
            "SELECT mmsi, vessel_name, vessel_type, callsign, imo, length_overall, beam, \
             deadweight, destination FROM vessels WHERE mmsi = ?1",
            params![key(mmsi)?],
            |row| {
                Ok(VesselSummary {
                    mmsi: row_mmsi(row, 0)?,
                    name: row.get(1)?,
                    vessel_type: row.get(2)?,
                    callsign: row.get(3)?,
                    imo: row.get(4)?,
                    length_overall: row.get(5)?,
                    beam: row.get(6)?,
                    deadweight: row.get(7)?,
                    destination: row.get(8)?,
                })
            },
        )
        .optional()
        .map_err(unavailable)
    }
}

impl VesselStore for SqliteStore {
    fn upsert_vessel(&mut self, mmsi: Mmsi, name: Option<&str>) -> Result<bool, StoreError> {
        let conn = self.conn();
        let id = key(mmsi)?;

        let existing: Option<Option<String>> = conn
            .query_row(
                "SELECT vessel_name FROM vessels WHERE mmsi = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(unavailable)?;

        match existing {
            Some(Some(_)) => Ok(false),
            Some(None) => {
                if let Some(name) = name {
                    conn.execute(
                        "UPDATE vessels SET vessel_name = ?2 WHERE mmsi = ?1 AND vessel_name IS NULL",
                        params![id, name],
                    )
                    .map_err(write_failed)?;
                }
                Ok(false)
            }
            None => {
                conn.execute(
                    "INSERT INTO vessels (mmsi, vessel_name) VALUES (?1, ?2)",
                    params![id, name],
                )
                .map_err(write_failed)?;
                Ok(true)
            }
        }
    }

    fn append_position(&mut self, report: &PositionReport) -> Result<(), StoreError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO vessel_positions ({POSITION_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    key(report.mmsi)?,
                    report.latitude,
                    report.longitude,
                    nanos(report.timestamp)?,
                    report.speed_over_ground,
                    report.course_over_ground,
                    report.heading,
                    report.nav_status,
                    report.destination,
                    report.data_source,
                ],
            )
            .map_err(write_failed)?;
        Ok(())
    }

    fn vessel(&self, mmsi: Mmsi) -> Result<Option<VesselSummary>, StoreError> {
        Self::vessel_with(&self.conn(), mmsi)
    }

    fn latest_position(&self, mmsi: Mmsi) -> Result<Option<PositionReport>, StoreError> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {POSITION_COLUMNS} FROM vessel_positions WHERE mmsi = ?1 \
                     ORDER BY timestamp DESC, id DESC LIMIT 1"
                ),
                params![key(mmsi)?],
                row_report,
            )
            .optional()
            .map_err(unavailable)
    }

    fn latest_positions(&self, query: &VesselQuery) -> Result<VesselPage, StoreError> {
        let conn = self.conn();

        let total: i64 = conn
            .query_row(
                "SELECT COUNT(DISTINCT mmsi) FROM vessel_positions",
                [],
                |row| row.get(0),
            )
            .map_err(unavailable)?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {POSITION_COLUMNS} FROM vessel_positions p \
                 WHERE p.id = (SELECT q.id FROM vessel_positions q WHERE q.mmsi = p.mmsi \
                               ORDER BY q.timestamp DESC, q.id DESC LIMIT 1) \
                 ORDER BY p.mmsi"
            ))
            .map_err(unavailable)?;
        let latest = stmt
            .query_map([], row_report)
            .map_err(unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)?;

        let mut vessels = Vec::new();
        for report in latest
            .into_iter()
            .filter(|r| match (&query.bbox, r.coordinates()) {
                (None, _) => true,
                (Some(bbox), Some((lat, lon))) => bbox.contains(lat, lon),
                (Some(_), None) => false,
            })
            .skip(query.offset)
            .take(query.limit)
        {
            vessels.push(VesselPosition {
                vessel: Self::vessel_with(&conn, report.mmsi)?,
                latest: report,
            });
        }

        Ok(VesselPage {
            total: count(total),
            vessels,
        })
    }

    fn track(&self, mmsi: Mmsi, since: DateTime<Utc>) -> Result<Vec<PositionReport>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {POSITION_COLUMNS} FROM vessel_positions \
                 WHERE mmsi = ?1 AND timestamp >= ?2 ORDER BY timestamp, id"
            ))
            .map_err(unavailable)?;
        let reports = stmt
            .query_map(params![key(mmsi)?, nanos(since)?], row_report)
            .map_err(unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)?;
        Ok(reports)
    }

    fn vessel_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM vessels", [], |row| row.get(0))
            .map_err(unavailable)?;
        Ok(count(n))
    }

    fn position_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM vessel_positions", [], |row| row.get(0))
            .map_err(unavailable)?;
        Ok(count(n))
    }
}

fn unavailable(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn write_failed(e: rusqlite::Error) -> StoreError {
    StoreError::WriteFailed(e.to_string())
}

fn key(mmsi: Mmsi) -> Result<i64, StoreError> {
    i64::try_from(mmsi.get())
        .map_err(|_| StoreError::WriteFailed(format!("MMSI {mmsi} out of range")))
}

fn nanos(timestamp: DateTime<Utc>) -> Result<i64, StoreError> {
    timestamp
        .timestamp_nanos_opt()
        .ok_or_else(|| StoreError::WriteFailed(format!("timestamp {timestamp} out of range")))
}

fn count(n: i64) -> usize {
    usize::try_from(n).unwrap_or_default()
}

fn row_mmsi(row: &Row<'_>, idx: usize) -> rusqlite::Result<Mmsi> {
    let raw: i64 = row.get(idx)?;
    Mmsi::try_from(raw).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, raw))
}

fn row_report(row: &Row<'_>) -> rusqlite::Result<PositionReport> {
    Ok(PositionReport {
        mmsi: row_mmsi(row, 0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        timestamp: Utc.timestamp_nanos(row.get(3)?),
        speed_over_ground: row.get(4)?,
        course_over_ground: row.get(5)?,
        heading: row.get(6)?,
        nav_status: row.get(7)?,
        destination: row.get(8)?,
        data_source: row.get(9)?,
    })
}
