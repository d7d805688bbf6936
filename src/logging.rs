//! Logging initialization.
//!
//! Compact stdout logging filtered through `RUST_LOG` (falling back to a
//! quiet default), with an optional non-blocking rolling file layer when
//! debug mode is on.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "wagate=info,whatsapp_rust=warn,wacore=warn";
const DEBUG_FILTER: &str = "wagate=debug,whatsapp_rust=info,wacore=info";

/// Logging configuration, built by `main` from CLI flags and config.
#[derive(Debug, Clone)]
pub struct LogConfig {
    debug: bool,
    log_dir: Option<PathBuf>,
    filter: Option<String>,
}

impl LogConfig {
    pub fn new() -> Self {
        Self {
            debug: false,
            log_dir: None,
            filter: None,
        }
    }

    pub fn with_debug_mode(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_log_dir(mut self, dir: PathBuf) -> Self {
        self.log_dir = Some(dir);
        self
    }

    /// Explicit filter directive, used when `RUST_LOG` is unset.
    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize the global subscriber.
///
/// Returns the file appender guard when a file layer was installed; the
/// caller must keep it alive for the process lifetime or buffered lines are
/// lost on exit.
pub fn init_logging(config: LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let default = match (&config.filter, config.debug) {
        (Some(explicit), _) => explicit.clone(),
        (None, true) => DEBUG_FILTER.to_string(),
        (None, false) => DEFAULT_FILTER.to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false);

    if config.debug {
        let dir = config
            .log_dir
            .unwrap_or_else(|| PathBuf::from("./logs"));
        std::fs::create_dir_all(&dir)?;
        let appender = tracing_appender::rolling::daily(&dir, "wagate.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .init();
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new()
            .with_debug_mode(true)
            .with_log_dir(PathBuf::from("/tmp/wagate-logs"));
        assert!(config.debug);
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/wagate-logs")));
    }

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert!(!config.debug);
        assert!(config.log_dir.is_none());
    }
}
