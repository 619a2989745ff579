//! Authentication middleware for the REST API
//!
//! Optional API key authentication via the X-Api-Key header. When
//! `ApiConfig::api_key` is set, every request (export triggers included) must
//! carry a matching header or it is answered with 401 Unauthorized.

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests whose X-Api-Key header does not match the configured key
///
/// With no key configured (`None`) every request passes through.
///
/// # Examples
///
/// ```no_run
/// use axum::{Router, middleware};
/// use tg_cloud_export::api::auth::require_api_key;
///
/// let api_key = Some("secret-key-123".to_string());
/// let router: Router = Router::new()
///     .layer(middleware::from_fn_with_state(api_key, require_api_key));
/// ```
pub async fn require_api_key(
    State(expected_api_key): State<Option<String>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected_key) = expected_api_key else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(key) if constant_time_eq(key.as_bytes(), expected_key.as_bytes()) => {
            next.run(request).await
        }
        Some(_) => unauthorized_response("Invalid API key"),
        None => unauthorized_response("Missing X-Api-Key header"),
    }
}

/// Byte comparison whose running time does not depend on where the inputs differ
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn unauthorized_response(message: &str) -> Response {
    let body = Json(json!({
        "error": {
            "code": "unauthorized",
            "message": message
        }
    }));

    (StatusCode::UNAUTHORIZED, body).into_response()
}
