//! Tracing subscriber initialization.
//!
//! ```no_run
//! // Human-readable logs, filtered by RUST_LOG (default `info`).
//! docflow::observability::init_tracing(false).unwrap();
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber.
///
/// Respects `RUST_LOG`, falling back to `info`. With `json` set, every event
/// is written as one JSON object per line.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(json: bool) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    }
}
