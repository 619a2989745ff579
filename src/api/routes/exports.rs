//! Export trigger handlers.
//!
//! Both routes resolve the channel before answering, then return 202 while the
//! export itself runs on the exporter's worker task.

use super::{ExportQuery, ExportRequest, ExportTriggerResponse};
use crate::api::AppState;
use crate::types::ExportAccepted;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

const ACCEPTED_MESSAGE: &str = "Your request is submitted. Chat will be exported soon!!";

/// GET /export/:channel - Queue a bulk export of a channel
#[utoipa::path(
    get,
    path = "/api/v1/export/{channel}",
    tag = "exports",
    params(
        ("channel" = String, Path, description = "Channel title substring or numeric id"),
        ("exts" = Option<String>, Query, description = "Comma-separated extension allow-list, e.g. .pdf,.mp4")
    ),
    responses(
        (status = 202, description = "Export queued", body = ExportTriggerResponse),
        (status = 404, description = "No channel matches", body = crate::error::ApiError),
        (status = 503, description = "Exporter is shutting down", body = crate::error::ApiError)
    )
)]
pub async fn trigger_export(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Response {
    let extensions: Vec<String> = query.exts.into_iter().collect();
    queue_export(&state, &channel, &extensions).await
}

/// POST /exports - Queue a bulk export with a JSON body
#[utoipa::path(
    post,
    path = "/api/v1/exports",
    tag = "exports",
    request_body = ExportRequest,
    responses(
        (status = 202, description = "Export queued", body = ExportTriggerResponse),
        (status = 404, description = "No channel matches", body = crate::error::ApiError),
        (status = 503, description = "Exporter is shutting down", body = crate::error::ApiError)
    )
)]
pub async fn create_export(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Response {
    queue_export(&state, &request.channel, &request.extensions).await
}

async fn queue_export(state: &AppState, channel: &str, extensions: &[String]) -> Response {
    match state.exporter.start_export(channel, extensions).await {
        Ok(accepted) => (StatusCode::ACCEPTED, Json(trigger_response(accepted))).into_response(),
        Err(e) => {
            tracing::debug!(channel, error = %e, "Export trigger rejected");
            e.into_response()
        }
    }
}

fn trigger_response(accepted: ExportAccepted) -> ExportTriggerResponse {
    ExportTriggerResponse {
        message: ACCEPTED_MESSAGE.to_string(),
        channel_id: accepted.channel.id.0,
        channel_title: accepted.channel.title,
        allowed_extensions: accepted.allowed_extensions,
    }
}
