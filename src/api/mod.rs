//! REST API server module
//!
//! HTTP trigger for bulk exports plus read-only inspection of checkpoints and
//! processed records. Every trigger returns as soon as the export is queued.

use crate::{Config, Exporter, Result};
use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod auth;
pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Exports
/// - `GET /export/:channel?exts=.pdf,.mp4` - Queue an export (title substring or id)
/// - `POST /exports` - Queue an export from a JSON body
///
/// ## Checkpoints
/// - `GET /checkpoints` - List all checkpoints
/// - `GET /checkpoints/:channel_id` - Get one channel's checkpoint
///
/// ## Records
/// - `GET /records` - Processed records (with pagination and channel filter)
///
/// ## Configuration
/// - `GET /config` - Current config (credentials redacted)
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive Swagger UI documentation (if enabled)
/// - `GET /events` - Server-sent events stream
pub fn create_router(exporter: Arc<Exporter>, config: Arc<Config>) -> Router {
    let state = AppState::new(exporter, config.clone());

    let router = Router::new()
        // Exports
        .route("/export/:channel", get(routes::trigger_export))
        .route("/exports", post(routes::create_export))
        // Checkpoints
        .route("/checkpoints", get(routes::list_checkpoints))
        .route("/checkpoints/:channel_id", get(routes::get_checkpoint))
        // Records
        .route("/records", get(routes::list_records))
        // Configuration
        .route("/config", get(routes::get_config))
        // System
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec))
        .route("/events", get(routes::event_stream));

    // Swagger UI is merged before state so it serves the same document
    let router = if config.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api/v1/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.with_state(state);

    let router = if config.api.api_key.is_some() {
        router.layer(middleware::from_fn_with_state(
            config.api.api_key.clone(),
            auth::require_api_key,
        ))
    } else {
        router
    };

    let router = router.layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        let cors = build_cors_layer(&config.api.cors_origins);
        router.layer(cors)
    } else {
        router
    }
}

/// Build a CORS layer for the configured origins ("*" or an empty list allows any)
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on `config.api.bind_address`.
///
/// Runs until the listener fails or the task is aborted.
///
/// # Example
///
/// ```no_run
/// use tg_cloud_export::Exporter;
/// use std::sync::Arc;
///
/// # async fn example(exporter: Exporter) -> Result<(), Box<dyn std::error::Error>> {
/// let config = exporter.get_config();
/// tg_cloud_export::api::start_api_server(Arc::new(exporter), config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(exporter: Arc<Exporter>, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(exporter, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}
