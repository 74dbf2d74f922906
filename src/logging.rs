//! Console logging for the binary.
//!
//! Library code logs through the `log` facade; the subscriber installed here
//! picks those records up and writes them to stderr, filtered by `RUST_LOG`
//! (default: `info`).

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. Calling it twice is harmless; the second
/// call is ignored.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
