//! Checkpoint inspection handlers.

use crate::api::AppState;
use crate::error::Error;
use crate::types::ChannelId;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// GET /checkpoints - List every channel's export checkpoint
#[utoipa::path(
    get,
    path = "/api/v1/checkpoints",
    tag = "checkpoints",
    responses(
        (status = 200, description = "All checkpoints", body = Vec<crate::types::ExportCheckpoint>),
        (status = 501, description = "Store cannot list checkpoints", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn list_checkpoints(State(state): State<AppState>) -> Response {
    match state.exporter.store().list_checkpoints().await {
        Ok(checkpoints) => (StatusCode::OK, Json(checkpoints)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /checkpoints/:channel_id - Get one channel's checkpoint
#[utoipa::path(
    get,
    path = "/api/v1/checkpoints/{channel_id}",
    tag = "checkpoints",
    params(
        ("channel_id" = i64, Path, description = "Channel id")
    ),
    responses(
        (status = 200, description = "Checkpoint", body = crate::types::ExportCheckpoint),
        (status = 404, description = "Channel has never been exported", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn get_checkpoint(
    State(state): State<AppState>,
    Path(channel_id): Path<i64>,
) -> Response {
    match state
        .exporter
        .store()
        .find_checkpoint(ChannelId(channel_id))
        .await
    {
        Ok(Some(checkpoint)) => (StatusCode::OK, Json(checkpoint)).into_response(),
        Ok(None) => {
            Error::NotFound(format!("checkpoint for channel {}", channel_id)).into_response()
        }
        Err(e) => e.into_response(),
    }
}
