//! Vessel query routes.
//!
//! # Endpoints
//!
//! ### `GET /api/v1/vessels?bbox=&limit=&offset=`
//! Vessels with their latest position. `bbox` is
//! `lat_min,lon_min,lat_max,lon_max` and filters on the latest position.
//! `limit` is 1..=1000 (default 100).
//!
//! ### `GET /api/v1/vessels/:mmsi`
//! One vessel with its latest position. 404 if no position is stored.
//!
//! ### `GET /api/v1/vessels/:mmsi/track?hours=`
//! Positions from the last `hours` (1..=168, default 24), oldest first.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use aisrelay_core::{BoundingBox, Mmsi, PositionReport, VesselQuery, VesselSummary};

use crate::{ApiError, AppState};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;
const DEFAULT_TRACK_HOURS: i64 = 24;
const MAX_TRACK_HOURS: i64 = 168;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub bbox: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TrackParams {
    pub hours: Option<i64>,
}

/// A vessel as rendered by the API.
#[derive(Debug, Serialize)]
pub struct VesselView {
    pub mmsi: Mmsi,
    pub vessel_name: String,
    pub vessel_type: String,
    pub imo: Option<u32>,
    pub callsign: Option<String>,
    pub length_overall: Option<f64>,
    pub beam: Option<f64>,
    pub deadweight: Option<u32>,
    pub positions: Vec<PositionReport>,
}

impl VesselView {
    fn new(mmsi: Mmsi, vessel: Option<VesselSummary>, latest: PositionReport) -> Self {
        let vessel = vessel.unwrap_or_else(|| VesselSummary::new(mmsi, None));
        Self {
            mmsi,
            vessel_name: vessel.name.unwrap_or_else(|| format!("Vessel {mmsi}")),
            vessel_type: vessel.vessel_type.unwrap_or_else(|| "unknown".to_string()),
            imo: vessel.imo,
            callsign: vessel.callsign,
            length_overall: vessel.length_overall,
            beam: vessel.beam,
            deadweight: vessel.deadweight,
            positions: vec![latest],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VesselList {
    pub total: usize,
    pub vessels: Vec<VesselView>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
pub struct TrackPoint {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub speed: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct Track {
    pub mmsi: Mmsi,
    pub track: Vec<TrackPoint>,
    pub avg_speed: f64,
}

/// Create vessel routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_vessels))
        .route("/:mmsi", get(get_vessel))
        .route("/:mmsi/track", get(get_track))
}

fn parse_mmsi(raw: &str) -> Result<Mmsi, ApiError> {
    raw.parse().map_err(ApiError::BadRequest)
}

/// GET /api/v1/vessels
async fn list_vessels(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<VesselList>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_LIMIT}"
        )));
    }
    let offset = params.offset.unwrap_or(0);
    let bbox = params
        .bbox
        .as_deref()
        .map(str::parse::<BoundingBox>)
        .transpose()
        .map_err(|_| ApiError::BadRequest("Invalid bbox format".to_string()))?;

    let page = state.store.read().await.latest_positions(&VesselQuery {
        bbox,
        limit,
        offset,
    })?;

    let vessels = page
        .vessels
        .into_iter()
        .map(|entry| VesselView::new(entry.latest.mmsi, entry.vessel, entry.latest))
        .collect();

    Ok(Json(VesselList {
        total: page.total,
        vessels,
        limit,
        offset,
    }))
}

/// GET /api/v1/vessels/:mmsi
async fn get_vessel(
    State(state): State<AppState>,
    Path(mmsi): Path<String>,
) -> Result<Json<VesselView>, ApiError> {
    let mmsi = parse_mmsi(&mmsi)?;
    let store = state.store.read().await;
    let latest = store
        .latest_position(mmsi)?
        .ok_or_else(|| ApiError::NotFound("Vessel not found".to_string()))?;

    Ok(Json(VesselView::new(mmsi, store.vessel(mmsi)?, latest)))
}

/// GET /api/v1/vessels/:mmsi/track
async fn get_track(
    State(state): State<AppState>,
    Path(mmsi): Path<String>,
    Query(params): Query<TrackParams>,
) -> Result<Json<Track>, ApiError> {
    let mmsi = parse_mmsi(&mmsi)?;
    let hours = params.hours.unwrap_or(DEFAULT_TRACK_HOURS);
    if !(1..=MAX_TRACK_HOURS).contains(&hours) {
        return Err(ApiError::BadRequest(format!(
            "hours must be between 1 and {MAX_TRACK_HOURS}"
        )));
    }

    let since = Utc::now() - Duration::hours(hours);
    let reports = state.store.read().await.track(mmsi, since)?;

    Ok(Json(Track {
        mmsi,
        avg_speed: average_speed(&reports),
        track: reports
            .into_iter()
            .map(|r| TrackPoint {
                lat: r.latitude,
                lon: r.longitude,
                timestamp: r.timestamp,
                speed: r.speed_over_ground,
            })
            .collect(),
    }))
}

/// Mean speed over ground, counting missing speeds as zero.
fn average_speed(reports: &[PositionReport]) -> f64 {
    if reports.is_empty() {
        return 0.0;
    }
    let sum: f64 = reports
        .iter()
        .map(|r| r.speed_over_ground.unwrap_or(0.0))
        .sum();
    sum / reports.len() as f64
}
