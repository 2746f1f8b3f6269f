// src/routes/health.rs
//! Liveness and system status endpoints.
//!
//! `/health` answers without touching storage so orchestrators can probe the
//! process cheaply. `/status` reports station, reading and anomaly counters
//! from the store and therefore also proves the database is reachable.
//! Follows the Explicit Module Boundary Pattern (EMBP): handlers stay private,
//! the gateway (`mod.rs`) only sees the subrouter.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::{
    access::Caller, models::SystemStatus, service::MonitoringService, store::Store, Result,
};

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Handle `GET /health`.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Handle `GET /status`.
async fn status<S: Store>(
    State(service): State<MonitoringService<S>>,
    caller: Caller,
) -> Result<Json<SystemStatus>> {
    // ---
    Ok(Json(service.system_status(&caller).await?))
}

/// Subrouter with `/health` and `/status`.
pub fn router<S: Store>() -> Router<MonitoringService<S>> {
    // ---
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status::<S>))
}
