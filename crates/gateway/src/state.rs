use std::{sync::Arc, time::Instant};

use herald_broadcast::BroadcastCoordinator;

/// Shared HTTP state.
pub struct GatewayState {
    pub coordinator: Arc<BroadcastCoordinator>,
    /// Process start, for uptime in `/status`.
    pub started: Instant,
    pub version: String,
}

impl GatewayState {
    pub fn new(coordinator: Arc<BroadcastCoordinator>, started: Instant) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            started,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}
