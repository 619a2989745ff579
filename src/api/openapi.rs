//! OpenAPI documentation and schema generation
//!
//! Spec for the tg-cloud-export REST API, generated at compile time by utoipa.

use utoipa::OpenApi;

/// OpenAPI documentation for the tg-cloud-export REST API
///
/// Served at:
/// - `/api/v1/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "tg-cloud-export REST API",
        version = "0.1.0",
        description = "Trigger resumable channel exports and inspect their checkpoints and uploaded attachments",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:8000/api/v1", description = "Local development server")
    ),
    paths(
        // Export triggers
        crate::api::routes::trigger_export,
        crate::api::routes::create_export,

        // Checkpoints
        crate::api::routes::list_checkpoints,
        crate::api::routes::get_checkpoint,

        // Records
        crate::api::routes::list_records,

        // Configuration
        crate::api::routes::get_config,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::ChannelId,
        crate::types::MessageId,
        crate::types::Channel,
        crate::types::SourceKind,
        crate::types::SkipReason,
        crate::types::ExportCheckpoint,
        crate::types::ProcessedMessageRecord,
        crate::types::ExportSummary,
        crate::types::Event,

        // Config types from config.rs
        crate::config::Config,
        crate::config::PlatformConfig,
        crate::config::ExportConfig,
        crate::config::RetryConfig,
        crate::config::UploadConfig,
        crate::config::PersistenceConfig,
        crate::config::ApiConfig,
        crate::classifier::ChannelRule,

        // API request/response types from routes
        crate::api::routes::ExportQuery,
        crate::api::routes::ExportRequest,
        crate::api::routes::ExportTriggerResponse,
        crate::api::routes::RecordsQuery,
        crate::api::routes::RecordsResponse,

        // Error types from error.rs
        crate::error::FailureKind,
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "exports", description = "Export triggers - Queue a bulk export of a channel's attachments"),
        (name = "checkpoints", description = "Checkpoints - Per-channel resume points"),
        (name = "records", description = "Records - Audit of uploaded attachments"),
        (name = "config", description = "Configuration - Current settings with credentials redacted"),
        (name = "system", description = "System endpoints - Health checks, OpenAPI spec, events"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds the X-Api-Key security scheme to the generated spec
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = &mut openapi.components {
            components.add_security_scheme(
                "api_key",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Header(
                        utoipa::openapi::security::ApiKeyValue::new("X-Api-Key"),
                    ),
                ),
            );
        }
    }
}
