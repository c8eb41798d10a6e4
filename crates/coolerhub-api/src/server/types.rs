//! Server state.

use coolerhub_core::Outbox;
use coolerhub_devices::StatusView;
use coolerhub_storage::StatsEngine;

/// Maximum request body size (64 KiB).
pub const MAX_REQUEST_BODY_SIZE: usize = 64 * 1024;

/// State shared across all handlers.
#[derive(Clone)]
pub struct ServerState {
    /// Reading store and statistics.
    pub engine: StatsEngine,
    /// Aggregator snapshot, when a hub runs in this process.
    pub view: Option<StatusView>,
    /// Announces readings received over HTTP on the transport.
    pub outbox: Option<Outbox>,
    /// Server start timestamp.
    pub started_at: i64,
}

impl ServerState {
    pub fn new(engine: StatsEngine) -> Self {
        Self {
            engine,
            view: None,
            outbox: None,
            started_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_view(mut self, view: StatusView) -> Self {
        self.view = Some(view);
        self
    }

    pub fn with_outbox(mut self, outbox: Outbox) -> Self {
        self.outbox = Some(outbox);
        self
    }
}
