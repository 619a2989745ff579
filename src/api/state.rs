//! Application state for the API server

use crate::{Config, Exporter};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned per request (Arc clones only).
#[derive(Clone)]
pub struct AppState {
    /// The exporter that trigger requests are queued on
    pub exporter: Arc<Exporter>,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(exporter: Arc<Exporter>, config: Arc<Config>) -> Self {
        Self { exporter, config }
    }
}
