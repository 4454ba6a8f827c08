//! Tracing subscriber setup for hosts that do not install their own.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive (e.g. `testmap=debug`).
pub const LOG_ENV_VAR: &str = "TESTMAP_LOG";

const DEFAULT_FILTER: &str = "warn";

static INIT: Once = Once::new();

/// Install a formatted subscriber writing to stderr.
///
/// Safe to call more than once; only the first call has an effect, and an
/// already installed global subscriber is left in place.
pub fn init_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init();
    });
}
