//! Structured logging with `tracing`.
//!
//! The relay logs through `tracing` macros with structured fields
//! (`client_id`, `role`, `recipients`, ...). [`init_subscriber`] installs a
//! compact stderr formatter whose filter honours `RUST_LOG` and otherwise
//! falls back to the configured level.

use tracing_subscriber::EnvFilter;

/// Default filter when neither `RUST_LOG` nor settings name one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at application startup. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| build_filter(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails if a global subscriber is already set
    let _ = subscriber.try_init();
}

/// Parse a level/directive string, falling back to [`DEFAULT_LOG_LEVEL`] when it is invalid.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
}
