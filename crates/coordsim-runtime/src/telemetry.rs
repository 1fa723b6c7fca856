//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `info`. Returns false if a global subscriber was already set.
pub fn init_tracing() -> bool {
    init_tracing_with("info")
}

/// Same as [`init_tracing`] with an explicit fallback directive
pub fn init_tracing_with(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
