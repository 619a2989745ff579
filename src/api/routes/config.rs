//! Configuration handlers.

use crate::api::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

/// GET /config - Get current config (credentials redacted)
#[utoipa::path(
    get,
    path = "/api/v1/config",
    tag = "config",
    responses(
        (status = 200, description = "Current configuration", body = crate::config::Config)
    )
)]
pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.exporter.get_config();
    (StatusCode::OK, Json(config.redacted()))
}
