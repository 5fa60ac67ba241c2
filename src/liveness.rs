//! Plain HTTP liveness check for the hosting platform.

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

pub const ALIVE: &str = "Bot is alive!";

pub fn router() -> Router {
    Router::new().route("/", get(|| async { ALIVE }))
}

/// Bind `addr` and serve [`router`] until the process exits.
pub async fn serve(addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "liveness endpoint listening");
    axum::serve(listener, router()).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
