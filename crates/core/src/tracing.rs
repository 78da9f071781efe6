//! Tracing subscriber initialisation
//!
//! Library code only emits events through the `tracing` macros. Binaries and
//! test harnesses call [`init`] once to install a subscriber that writes to
//! stderr.

use crate::constants::{DEFAULT_LOG_FILTER, UTILZ_LOG_VAR};
use crate::errors::{Error, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing system
///
/// The filter comes from `UTILZ_LOG`, then `RUST_LOG`, then falls back to
/// `info`.
pub fn init() -> Result<()> {
    let filter = EnvFilter::try_from_env(UTILZ_LOG_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .map_err(|e| Error::tracing_init(format!("invalid log filter: {e}")))?;

    install(filter)
}

/// Initialize the tracing system with an explicit filter directive
pub fn init_with_filter(directive: &str) -> Result<()> {
    let filter = EnvFilter::try_new(directive)
        .map_err(|e| Error::tracing_init(format!("invalid log filter '{directive}': {e}")))?;

    install(filter)
}

fn install(filter: EnvFilter) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(is_tty())
        .compact()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::tracing_init(e.to_string()))
}

/// Check if we're running in a TTY environment
fn is_tty() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stderr())
}
