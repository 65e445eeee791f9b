//! Logging setup.
//!
//! The subscriber is installed before configuration is read so that config
//! errors are logged. `logging.level` is applied afterwards through the
//! reload handle, unless `RUST_LOG` pinned the filter at startup.

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

const STARTUP_LEVEL: &str = "info";

/// Retargets the global log filter after startup.
pub struct LogLevel {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
}

/// Install the global `fmt` subscriber.
pub fn init_tracing() -> LogLevel {
    let pinned = std::env::var_os("RUST_LOG").is_some();
    let filter = if pinned {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(STARTUP_LEVEL))
    } else {
        EnvFilter::new(STARTUP_LEVEL)
    };

    let (filter, handle) = reload::Layer::new(filter);
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();

    LogLevel {
        handle: (!pinned).then_some(handle),
    }
}

impl LogLevel {
    /// Switch to the configured level. A no-op when `RUST_LOG` is set.
    pub fn apply(&self, level: &str) {
        let Some(handle) = &self.handle else {
            tracing::debug!(level, "RUST_LOG set, ignoring logging.level");
            return;
        };
        if let Err(e) = handle.modify(|filter| *filter = EnvFilter::new(level)) {
            tracing::warn!(error = %e, level, "failed to apply logging level");
        }
    }
}
