//! Console logging setup

use crate::config::LogConfig;
use tracing_subscriber::EnvFilter;

/// Default filter for a given configuration; `RUST_LOG` takes precedence.
pub fn default_filter(config: &LogConfig) -> &'static str {
    if config.debug {
        "turf=debug,info"
    } else if config.quiet {
        "warn"
    } else {
        "info"
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays
/// machine-readable.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(config.color)
        .with_target(config.debug)
        .without_time()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        let mut config = LogConfig::default();
        assert_eq!(default_filter(&config), "info");
        config.quiet = true;
        assert_eq!(default_filter(&config), "warn");
        config.debug = true;
        assert_eq!(default_filter(&config), "turf=debug,info");
    }
}
