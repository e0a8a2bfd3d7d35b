//! Tracing bootstrap for binaries, demos, and tests.
//!
//! The engine itself only emits `tracing` events; wiring a subscriber is the
//! embedder's choice. This helper installs a sensible default: env-filtered
//! (`PLAIT_LOG`, falling back to `RUST_LOG`), compact output to stderr.

use tracing_subscriber::{fmt, EnvFilter};

const ENV_VAR: &str = "PLAIT_LOG";

/// Install the default subscriber. Safe to call more than once; later calls
/// are no-ops because a global subscriber is already set.
pub fn init() {
    let filter = EnvFilter::try_from_env(ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
