use std::sync::Arc;
use wisp_core::Registry;

/// Shared application state passed to the dispatch handler.
///
/// The registry is read-only after startup, so sharing it across
/// concurrent request handlers needs no locking.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
}

impl AppState {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}
