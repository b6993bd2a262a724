//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info,turt_renderer=debug,turt_rhi=info";

/// Installs the global tracing subscriber.
///
/// Filtering comes from `RUST_LOG` when present, otherwise [`DEFAULT_FILTER`].
/// Calling this twice is harmless; the second installation is ignored.
///
/// # Example
/// ```
/// turt_core::init_logging();
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
