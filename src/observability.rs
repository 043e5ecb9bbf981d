//! Logging initialization.
//!
//! Structured logging via `tracing`; the filter comes from `RUST_LOG` when
//! set, otherwise from the supplied default directive.

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// Safe to call once per process; later calls are ignored so tests that
/// race on initialization do not panic.
pub fn init_logging(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
