//! ZenTalk Logging
//!
//! Tracing subscriber setup shared by the binaries. The filter comes from
//! `ZENTALK_LOG` (falling back to the provided default), so operators can
//! raise verbosity per module without a rebuild.

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable consulted for the log filter
pub const LOG_ENV: &str = "ZENTALK_LOG";

/// Install the global subscriber. Safe to call once per process; later
/// calls are ignored.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Default filter for interactive use
pub fn init_default() {
    init("info");
}
