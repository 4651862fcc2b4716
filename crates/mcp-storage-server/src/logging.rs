//! Tracing subscriber setup for the binary

use tracing_subscriber::EnvFilter;

/// `RUST_LOG` when set, otherwise `level`
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global fmt subscriber
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .try_init();
}
