//! Processed-record audit handlers.

use super::{RecordsQuery, RecordsResponse};
use crate::api::AppState;
use crate::types::ChannelId;
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// GET /records - Page through uploaded-attachment records
#[utoipa::path(
    get,
    path = "/api/v1/records",
    tag = "records",
    params(
        ("channel_id" = Option<i64>, Query, description = "Restrict to one channel"),
        ("limit" = Option<i64>, Query, description = "Maximum number of items to return"),
        ("offset" = Option<i64>, Query, description = "Number of items to skip")
    ),
    responses(
        (status = 200, description = "Processed records, most recent first", body = RecordsResponse),
        (status = 501, description = "Store cannot query records", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn list_records(
    State(state): State<AppState>,
    Query(query): Query<RecordsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50).clamp(1, 1000) as usize;
    let offset = query.offset.unwrap_or(0).max(0) as usize;
    let channel_id = query.channel_id.map(ChannelId);
    let store = state.exporter.store();

    let items = match store.list_processed_records(channel_id, limit, offset).await {
        Ok(items) => items,
        Err(e) => return e.into_response(),
    };
    match store.count_processed_records(channel_id).await {
        Ok(total) => (
            StatusCode::OK,
            Json(RecordsResponse {
                items,
                total,
                limit,
                offset,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
