//! Subscriber setup for the `tracing` facade the rest of the workspace
//! logs through.
//!
//! Every worker loop (encoder, indexer, resume loader) logs through
//! `tracing`'s macros directly; this crate only owns turning
//! [`LoggingConfig`] into an installed global subscriber once, at process
//! start.

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging knobs read from the process configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive string, e.g. `"info"` or
    /// `"evochora_indexer=debug,evochora_codec=warn"`.
    pub filter: String,
    /// Emit one JSON object per line instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Installs a global `tracing` subscriber built from `config`.
///
/// Idempotent in the sense that calling it twice in one process is a
/// programming error the underlying `tracing` crate will report (it
/// panics on a second global-default install); workers should call this
/// exactly once, at startup.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_is_info() {
        assert_eq!(LoggingConfig::default().filter, "info");
    }
}
