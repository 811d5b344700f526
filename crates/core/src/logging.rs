//! Logging setup.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Used when `RUST_LOG` is unset or invalid. Targets match by prefix, so
/// `lumen` covers every engine crate.
const DEFAULT_FILTER: &str = "info,lumen=debug";

/// Install the global `tracing` subscriber.
///
/// Lines carry their target and thread id. A second call is a no-op.
///
/// ```
/// lumen_core::init_logging();
/// tracing::info!("engine starting");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
