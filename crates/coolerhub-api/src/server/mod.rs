//! HTTP server.

pub mod router;
pub mod types;

pub use router::create_router;
pub use types::{MAX_REQUEST_BODY_SIZE, ServerState};

use std::net::SocketAddr;

use tracing::info;

/// Serve the API on `bind` until the task is cancelled.
pub async fn run(bind: SocketAddr, state: ServerState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
