// ABOUTME: Shared logging setup for all ticker binaries
// ABOUTME: Stderr subscriber with INFO default and RUST_LOG override

use tracing_subscriber::EnvFilter;

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}
