//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`exports`] - Export triggers
//! - [`checkpoints`] - Per-channel export progress
//! - [`records`] - Processed-attachment audit
//! - [`config`] - Configuration
//! - [`system`] - Health, events, OpenAPI

use serde::{Deserialize, Serialize};

mod checkpoints;
mod config;
mod exports;
mod records;
mod system;

// Re-export all handlers so `routes::function_name` works from the router
pub use checkpoints::*;
pub use config::*;
pub use exports::*;
pub use records::*;
pub use system::*;

// ============================================================================
// Query/Request Types (shared across handlers)
// ============================================================================

/// Query parameters for GET /export/:channel
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct ExportQuery {
    /// Comma-separated extension allow-list, e.g. ".pdf,.mp4" (omitted = no restriction)
    pub exts: Option<String>,
}

/// Request body for POST /exports
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct ExportRequest {
    /// Channel title substring or numeric id
    pub channel: String,
    /// Extension allow-list; entries may be comma-separated and may omit the dot
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// Response for an accepted export trigger
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct ExportTriggerResponse {
    /// Human-readable acknowledgement
    pub message: String,
    /// Resolved channel id
    pub channel_id: i64,
    /// Resolved channel title
    pub channel_title: String,
    /// Normalized allow-list the export will use
    pub allowed_extensions: Vec<String>,
}

/// Query parameters for GET /records
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct RecordsQuery {
    /// Restrict to one channel
    pub channel_id: Option<i64>,
    /// Maximum number of items to return (default: 50)
    pub limit: Option<i64>,
    /// Number of items to skip (default: 0)
    pub offset: Option<i64>,
}

/// Response for GET /records
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct RecordsResponse {
    /// Records on this page, most recent first
    pub items: Vec<crate::types::ProcessedMessageRecord>,
    /// Total records matching the filter
    pub total: i64,
    /// Page size used
    pub limit: usize,
    /// Offset used
    pub offset: usize,
}
