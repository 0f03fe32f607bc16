//! Tracing bootstrap.
//!
//! The runtime emits structured `tracing` events (resolution, updates, pod
//! delegation, disposal). Hosts that already install a subscriber can skip
//! this module entirely.

use tracing_subscriber::EnvFilter;

/// Initialise a global `tracing` subscriber with env-filter support
/// (`RUST_LOG`), defaulting to `info`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
