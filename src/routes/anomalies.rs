// src/routes/anomalies.rs
//! Anomaly summary and operator workflow endpoints.

use axum::{
    extract::{Path, Query, State},
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    access::Caller,
    models::{Anomaly, AnomalyCount, ProcessingStatus},
    service::{AnomalyWindow, MonitoringService},
    store::Store,
    Result,
};

// ---

pub fn router<S: Store>() -> Router<MonitoringService<S>> {
    // ---
    Router::new()
        .route("/anomalies", get(list::<S>))
        .route("/anomalies/{id}", patch(process::<S>))
}

#[derive(Debug, Deserialize)]
struct ProcessBody {
    processing_status: ProcessingStatus,
}

/// `GET /anomalies?from=..&to=..` or `?days=N`.
async fn list<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
    Query(window): Query<AnomalyWindow>,
) -> Result<Json<Vec<AnomalyCount>>> {
    // ---
    Ok(Json(service.list_anomalies(&caller, window).await?))
}

async fn process<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
    Path(id): Path<i64>,
    Json(body): Json<ProcessBody>,
) -> Result<Json<Anomaly>> {
    // ---
    Ok(Json(
        service
            .process_anomaly(&caller, id, body.processing_status)
            .await?,
    ))
}
