//! Tracing setup. The filter sits behind a reload layer so the level from the
//! config file can replace the bootstrap level once the config is loaded.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

fn rust_log_filter() -> Option<EnvFilter> {
    std::env::var_os("RUST_LOG")?;
    EnvFilter::try_from_default_env().ok()
}

/// Install the global subscriber at `info`, or at `RUST_LOG` when set.
pub fn init_tracing() {
    let filter = rust_log_filter().unwrap_or_else(|| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(filter);
    let _ = FILTER_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Switch to the configured `logging.level`. A `RUST_LOG` setting takes
/// precedence and is left in place.
pub fn apply_logging_level(level: &str) {
    if rust_log_filter().is_some() {
        return;
    }
    if let Some(handle) = FILTER_HANDLE.get() {
        let _ = handle.modify(|filter| *filter = EnvFilter::new(level));
    }
}
