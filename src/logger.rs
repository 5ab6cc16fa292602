//! Logging setup for binaries, examples, and tests.
//!
//! The solvers report per-iteration diagnostics through `tracing` as
//! fixed-width tables (iteration, residual norms, step sizes). This module
//! installs a subscriber tuned for that output; library code never installs
//! one itself.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Installs the subscriber at the default INFO level.
///
/// `RUST_LOG` overrides the default, e.g. `RUST_LOG=apex_rotation=debug`.
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Installs the subscriber with a custom default level.
pub fn init_logger_with_level(default_level: Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    // Compact, target-free lines keep the iteration tables aligned.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
