//! Local ops HTTP endpoint: health probe and system status.
//!
//! Deliberately tiny — the full admin surface is fronted by an external
//! gateway; this listener exists so deployments can probe the
//! controller directly.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{AppError, Result};

use super::facade::AdminApi;

/// Build the ops router.
#[must_use]
pub fn router(api: Arc<AdminApi>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/system/status", get(system_status))
        .with_state(api)
}

/// Liveness probe.
async fn healthz() -> &'static str {
    "ok"
}

/// Fleet status snapshot.
async fn system_status(State(api): State<Arc<AdminApi>>) -> Response {
    match api.system_status().await {
        Ok(status) => Json(status).into_response(),
        Err(err) => {
            error!(%err, "system status failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "status unavailable").into_response()
        }
    }
}

/// Bind and serve the ops endpoint until cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the port cannot be bound.
pub async fn serve(api: Arc<AdminApi>, port: u16, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|err| AppError::Config(format!("cannot bind ops port {port}: {err}")))?;
    info!(port, "ops endpoint listening");

    axum::serve(listener, router(api))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|err| AppError::Internal(format!("ops endpoint failed: {err}")))
}
