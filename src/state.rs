//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::routes::status::StatusBoard;
use crate::session::SessionRegistry;

/// Shared state behind the status router
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    registry: SessionRegistry,
    status: StatusBoard,
}

impl AppState {
    pub fn new(config: Config, registry: SessionRegistry, status: StatusBoard) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                registry,
                status,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the session registry
    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Get the maintenance status board
    pub fn status(&self) -> &StatusBoard {
        &self.inner.status
    }
}
