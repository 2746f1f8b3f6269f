//! HTTP gateway (EMBP): merges the per-area subrouters, installs the request
//! span middleware and binds the shared [`MonitoringService`] as state.

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    Router,
};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::{service::MonitoringService, store::Store};

mod anomalies;
mod health;
mod readings;
mod reports;
mod statistics;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

// ---

pub fn router<S: Store>(service: MonitoringService<S>) -> Router {
    // ---
    Router::new()
        .merge(readings::router::<S>())
        .merge(statistics::router::<S>())
        .merge(anomalies::router::<S>())
        .merge(reports::router::<S>())
        .merge(health::router::<S>())
        .layer(middleware::from_fn(request_span))
        .with_state(service)
}

/// Run each request inside a span carrying a fresh request id, and echo the
/// id back in `x-request-id`.
async fn request_span(request: Request, next: Next) -> Response {
    // ---
    let request_id = Uuid::new_v4();
    let span = info_span!(
        "request",
        %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span.clone()).await;
    span.in_scope(|| info!(status = response.status().as_u16(), "Request finished"));

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
