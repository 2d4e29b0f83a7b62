//! Tracing subscriber setup for binaries.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the filter directives,
/// e.g. `CLEARCUT_LOG=clearcut_core=debug,info`.
pub const LOG_ENV: &str = "CLEARCUT_LOG";

static INIT: Once = Once::new();

/// Install the global subscriber once; later calls are no-ops.
/// Falls back to `info` when `CLEARCUT_LOG` is unset or invalid.
pub fn init_tracing(json: bool) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);
        let installed = if json {
            registry.with(fmt::layer().json().with_current_span(true).with_writer(std::io::stderr)).try_init()
        } else {
            registry.with(fmt::layer().with_target(true).with_writer(std::io::stderr)).try_init()
        };
        if installed.is_err() {
            tracing::debug!("a global subscriber was already installed");
        }
    });
}
