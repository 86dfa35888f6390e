//! Log output setup
//!
//! Diagnostics go through `tracing`; this installs the subscriber. The
//! filter comes from `RUST_LOG` when set, otherwise from `[logging] level`.
//! Logs are written to stderr so JSON status lines on stdout stay clean.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Build the filter for `config`, preferring `RUST_LOG`.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(config: &LoggingConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if config.json { builder.json().try_init() } else { builder.try_init() };
    if result.is_err() {
        tracing::debug!("logging already initialised");
    }
}
