//! Health, readiness and metrics handlers.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use super::AppState;
use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub app: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub database: bool,
    pub cache: bool,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        app: "roady",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match state.lock_db() {
        Ok(db) => db.ping().is_ok(),
        Err(_) => false,
    };
    let cache = match state.cache.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Cache not ready");
            false
        }
    };

    let ready = database && cache;
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(ReadyResponse {
            status: if ready { "ready" } else { "not_ready" },
            database,
            cache,
        }),
    )
}

pub async fn metrics_text(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let body = state
        .metrics
        .encode_text()
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
