//! Application state for the API server.

use std::sync::Arc;

use relay_coordinator::{Coordinator, RelayConfig};

/// Shared application state for the API server.
pub struct AppState {
    /// The coordinator that processes every turn.
    pub coordinator: Arc<Coordinator>,

    /// Server start time (for health checks).
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            coordinator: Arc::new(Coordinator::from_config(config)),
            start_time: std::time::Instant::now(),
        }
    }

    /// Get the uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
