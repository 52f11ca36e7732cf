//! The Box3 delivery gateway.
//!
//! Ships three binaries:
//!
//! - `box3-gateway`: serves the paywalled `/api/unlock-box` route and proxies tag
//!   and package requests to the backend.
//! - `box3-facilitator`: a development facilitator settling against an in-memory ledger.
//! - `box3-pay`: requests a paywalled resource and pays the challenge with a local key.

pub mod app;
pub mod backend;
pub mod config;
pub mod facilitator_service;

use tracing_subscriber::EnvFilter;

/// Install the global subscriber, filtered by `RUST_LOG` and defaulting to `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received, draining connections..."),
        Err(err) => {
            tracing::error!(error = %err, "Failed to listen for Ctrl-C, serving until killed");
            std::future::pending::<()>().await;
        }
    }
}
