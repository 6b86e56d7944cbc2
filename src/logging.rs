//! Logging initialization.
//!
//! Embedders that already install a `tracing` subscriber can skip this; `init`
//! is a no-op when a global subscriber exists.

use tracing_subscriber::EnvFilter;

/// Install the default subscriber: compact formatter, `RUST_LOG`-controlled
/// filtering, `info` when unset.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
