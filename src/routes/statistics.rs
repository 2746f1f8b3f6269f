// src/routes/statistics.rs
//! Periodic statistics endpoints and the per-station daily series.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    access::Caller,
    models::{DailyAirQuality, DailyTrend, PeriodicStatistic, Scope, StatisticsFilter},
    period::Period,
    service::MonitoringService,
    store::Store,
    Result,
};

// ---

pub fn router<S: Store>() -> Router<MonitoringService<S>> {
    // ---
    Router::new()
        .route("/statistics", get(list::<S>))
        .route("/statistics/run", post(run::<S>))
        .route("/stations/{id}/trend", get(trend::<S>))
        .route("/stations/{id}/air-quality", get(air_quality::<S>))
}

/// Body of `POST /statistics/run`.
#[derive(Debug, Deserialize)]
struct RunBody {
    #[serde(flatten)]
    scope: Scope,
    period: Period,
    /// Any date inside the period.
    period_date: NaiveDate,
}

#[derive(Debug, Serialize)]
struct RunResponse {
    /// `false` when no valid reading fell into the period.
    updated: bool,
}

#[derive(Debug, Deserialize)]
struct DaysQuery {
    days: Option<u32>,
}

// ---

async fn run<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
    Json(body): Json<RunBody>,
) -> Result<Json<RunResponse>> {
    // ---
    debug!(?body, "POST /statistics/run");
    let updated = service
        .run_aggregation(&caller, body.scope, body.period, body.period_date)
        .await?;
    Ok(Json(RunResponse { updated }))
}

async fn list<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
    Query(filter): Query<StatisticsFilter>,
) -> Result<Json<Vec<PeriodicStatistic>>> {
    // ---
    Ok(Json(service.list_statistics(&caller, filter).await?))
}

async fn trend<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
    Path(station_id): Path<i64>,
    Query(q): Query<DaysQuery>,
) -> Result<Json<Vec<DailyTrend>>> {
    // ---
    Ok(Json(service.trend(&caller, station_id, q.days).await?))
}

async fn air_quality<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
    Path(station_id): Path<i64>,
    Query(q): Query<DaysQuery>,
) -> Result<Json<Vec<DailyAirQuality>>> {
    // ---
    Ok(Json(service.air_quality(&caller, station_id, q.days).await?))
}
