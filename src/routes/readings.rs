// src/routes/readings.rs
//! Reading endpoints: ingestion, listing, corrections and deletion.
//!
//! Every write goes through the access façade, which classifies the reading
//! before the response is sent, so the returned body already carries the
//! validity flag and any anomalies.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    access::Caller,
    models::{Anomaly, Measurements, NewReading, Reading, ReadingFilter, ValidityFlag},
    service::MonitoringService,
    store::Store,
    Error, Result,
};

/// Limit applied when a listing does not ask for one.
const DEFAULT_LIMIT: u32 = 1000;

// ---

pub fn router<S: Store>() -> Router<MonitoringService<S>> {
    // ---
    Router::new()
        .route("/readings", post(ingest::<S>).get(list::<S>))
        .route("/readings/latest", get(latest::<S>))
        .route("/readings/reclassify", post(reclassify::<S>))
        .route(
            "/readings/{id}",
            get(fetch::<S>).put(correct::<S>).delete(remove::<S>),
        )
        .route("/readings/{id}/status", patch(update_status::<S>))
}

/// Query parameters for `GET /readings`.
#[derive(Debug, Default, Deserialize)]
pub struct ReadingsQuery {
    region_id: Option<i64>,
    station_id: Option<i64>,
    sensor_id: Option<i64>,
    /// Collection time range, e.g. "2025-03-21T00:00:00Z,2025-03-22T00:00:00Z".
    /// Either side may be left empty.
    time_range: Option<String>,
    validity: Option<ValidityFlag>,
    limit: Option<u32>,
}

impl ReadingsQuery {
    fn into_filter(self) -> Result<ReadingFilter> {
        // ---
        let (from, to) = match self.time_range.as_deref() {
            Some(range) => parse_time_range(range)?,
            None => (None, None),
        };
        Ok(ReadingFilter {
            region_id: self.region_id,
            station_id: self.station_id,
            sensor_id: self.sensor_id,
            from,
            to,
            validity: self.validity,
            limit: Some(self.limit.unwrap_or(DEFAULT_LIMIT)),
        })
    }
}

type TimeBounds = (Option<DateTime<Utc>>, Option<DateTime<Utc>>);

/// Parse "start,end" into RFC 3339 bounds.
fn parse_time_range(range: &str) -> Result<TimeBounds> {
    // ---
    let (start, end) = range
        .split_once(',')
        .ok_or_else(|| Error::validation("time_range must look like 'start,end'"))?;

    let parse = |s: &str| -> Result<Option<DateTime<Utc>>> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(None);
        }
        DateTime::parse_from_rfc3339(s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| Error::validation(format!("invalid timestamp '{s}': {e}")))
    };
    Ok((parse(start)?, parse(end)?))
}

#[derive(Debug, Serialize)]
struct ReadingDetail {
    #[serde(flatten)]
    reading: Reading,
    anomalies: Vec<Anomaly>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    validity: ValidityFlag,
}

#[derive(Debug, Default, Deserialize)]
struct ReclassifyBody {
    #[serde(default)]
    ids: Option<Vec<i64>>,
}

// ---

async fn ingest<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
    Json(reading): Json<NewReading>,
) -> Result<impl IntoResponse> {
    // ---
    debug!(station_id = reading.station_id, "POST /readings");
    let outcome = service.ingest_reading(&caller, reading).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn list<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
    Query(params): Query<ReadingsQuery>,
) -> Result<Json<Vec<Reading>>> {
    // ---
    debug!(?params, "GET /readings");
    let readings = service.list_readings(&caller, params.into_filter()?).await?;
    Ok(Json(readings))
}

async fn latest<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
) -> Result<impl IntoResponse> {
    // ---
    Ok(Json(service.latest_readings(&caller).await?))
}

async fn fetch<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    // ---
    let (reading, anomalies) = service.reading(&caller, id).await?;
    Ok(Json(ReadingDetail { reading, anomalies }))
}

async fn correct<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
    Path(id): Path<i64>,
    Json(measurements): Json<Measurements>,
) -> Result<impl IntoResponse> {
    // ---
    Ok(Json(service.correct_reading(&caller, id, measurements).await?))
}

async fn update_status<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
    Path(id): Path<i64>,
    Json(body): Json<StatusBody>,
) -> Result<impl IntoResponse> {
    // ---
    Ok(Json(
        service
            .update_reading_status(&caller, id, body.validity)
            .await?,
    ))
}

async fn remove<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    // ---
    service.delete_reading(&caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reclassify<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
    Json(body): Json<ReclassifyBody>,
) -> Result<impl IntoResponse> {
    // ---
    Ok(Json(service.reclassify(&caller, body.ids).await?))
}
