//! Liveness endpoint for the read API.
//!
//! `GET /health` answers as long as the HTTP server is up. It does not touch
//! the database: a storage outage shows up as `503` on `/api/readings`, not
//! as a failed liveness probe that would get the container restarted.

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Subrouter with the `/health` route, generic over the gateway state.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
