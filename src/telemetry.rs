//! Logging initialization.
//!
//! Diagnostics go to stderr through `tracing`, filtered by `RUST_LOG`
//! (default `warn`, so normal runs are quiet). Engine progress intended
//! for the user is plain stdout, not tracing events.

use tracing_subscriber::EnvFilter;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .ok();
}
