//! Logging initialisation for the tsbench binary.

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Filter applied when neither `--log-filter` nor `-v` is given.
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Parser)]
pub(crate) struct LoggingConfig {
    /// Logs: filter directive
    ///
    /// Accepts the tracing-subscriber `EnvFilter` syntax, e.g. "info" or
    /// "tsbench_load=debug,info". Ignored when `-v` is given.
    #[clap(long = "log-filter", env = "LOG_FILTER", global = true)]
    pub(crate) log_filter: Option<String>,

    /// Logs: increase verbosity (-v debug, -vv trace)
    #[clap(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        global = true
    )]
    pub(crate) verbose: u8,
}

impl LoggingConfig {
    fn directives(&self) -> String {
        match self.verbose {
            0 => self
                .log_filter
                .clone()
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    }
}

/// Install the global tracing subscriber described by the CLI config.
pub(crate) fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(config.directives())?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(log_filter: Option<&str>, verbose: u8) -> LoggingConfig {
        LoggingConfig {
            log_filter: log_filter.map(str::to_string),
            verbose,
        }
    }

    #[test]
    fn default_filter_is_info() {
        assert_eq!(config(None, 0).directives(), "info");
    }

    #[test]
    fn explicit_filter_is_used_verbatim() {
        assert_eq!(
            config(Some("tsbench_load=debug,warn"), 0).directives(),
            "tsbench_load=debug,warn"
        );
    }

    #[test]
    fn verbosity_overrides_filter() {
        assert_eq!(config(Some("warn"), 1).directives(), "debug");
        assert_eq!(config(Some("warn"), 2).directives(), "trace");
        assert_eq!(config(None, 3).directives(), "trace");
    }
}
