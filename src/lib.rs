pub mod channel; // Realtime gateway client (WebSocket)
pub mod client; // Identity / appointment / notification services
pub mod config;
pub mod core_state; // Composition root
pub mod engine; // Realtime reconciliation
pub mod models;

#[cfg(test)]
mod test_support;

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber. `RUST_LOG` wins over the
/// crate's default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}
