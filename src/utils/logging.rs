// src/utils/logging.rs
//! Log subscriber setup
//!
//! Debug-level output is gated behind the config `debug` flag; error-level
//! output is always emitted to stderr so integrators can diagnose delivery
//! problems without verbose mode.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber for the process.
///
/// Safe to call more than once; a subscriber installed elsewhere wins.
pub fn init(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("signalpost={}", level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
