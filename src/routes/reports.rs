// src/routes/reports.rs
//! Report generation and retrieval.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::debug;

use crate::{
    access::Caller,
    models::Report,
    service::{MonitoringService, ReportRequest},
    store::Store,
    Result,
};

// ---

pub fn router<S: Store>() -> Router<MonitoringService<S>> {
    // ---
    Router::new()
        .route("/reports", post(generate::<S>))
        .route("/reports/{id}", get(fetch::<S>))
}

/// `POST /reports` with `{"period": {"kind": "month", "year": 2025, "month": 3}}`.
async fn generate<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
    Json(request): Json<ReportRequest>,
) -> Result<impl IntoResponse> {
    // ---
    debug!(period = %request.period, refresh = request.refresh, "POST /reports");
    let report = service.generate_report(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn fetch<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<Json<Report>> {
    // ---
    Ok(Json(service.report(&caller, id).await?))
}
