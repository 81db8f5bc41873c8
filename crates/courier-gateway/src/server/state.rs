//! Gateway state
//!
//! Application state for the gateway server.

use crate::router::EventRouter;
use courier_common::GatewayConfig;
use std::sync::Arc;

/// Gateway application state
///
/// Cheap to clone; every handler gets its own copy.
#[derive(Clone)]
pub struct GatewayState {
    /// Composition root of the realtime core
    router: Arc<EventRouter>,
    /// Gateway configuration
    config: Arc<GatewayConfig>,
}

impl GatewayState {
    /// Create a new gateway state
    pub fn new(router: Arc<EventRouter>, config: GatewayConfig) -> Self {
        Self {
            router,
            config: Arc::new(config),
        }
    }

    /// Get the event router
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Get the gateway configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("router", &self.router)
            .field("config", &"GatewayConfig")
            .finish()
    }
}
