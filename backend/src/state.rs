//! Application state management.

use crate::mcp::{McpService, RegistrySettings};
use crate::resources::{ResourceProvider, StaticCatalog};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Session registry, channels and dispatcher
    service: McpService,
}

impl AppState {
    /// Create new application state serving resources from `provider`.
    pub fn new(provider: Arc<dyn ResourceProvider>, settings: RegistrySettings) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                service: McpService::new(provider, settings),
            }),
        }
    }

    /// Get the session service.
    pub fn service(&self) -> &McpService {
        &self.inner.service
    }
}

impl Default for AppState {
    /// State backed by the bundled sample catalog and default timings.
    fn default() -> Self {
        Self::new(
            Arc::new(StaticCatalog::sample()),
            RegistrySettings::default(),
        )
    }
}
