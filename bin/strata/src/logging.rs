//! Logging setup for the strata binary.

use clap::Args;
use eyre::{Result, eyre};
use tracing_subscriber::EnvFilter;

/// Logging configuration.
#[derive(Debug, Args, Clone, Default)]
#[command(next_help_heading = "Logging")]
pub(crate) struct LogArgs {
    /// Silence everything but errors.
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Verbose mode (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbosity: u8,

    /// Log filter directive (e.g., "strata_blockstore=debug").
    #[arg(long = "log.filter", value_name = "DIRECTIVE", global = true)]
    pub(crate) filter: Option<String>,

    /// Use JSON format for log output.
    #[arg(long = "log.json", global = true)]
    pub(crate) json: bool,
}

impl LogArgs {
    /// The filter is built with the following precedence:
    /// 1. If `--quiet` is set, only errors are shown
    /// 2. Otherwise, start with `RUST_LOG` if set, or a level from the verbosity flags
    /// 3. Apply any custom directives from `--log.filter`
    pub(crate) fn env_filter(&self) -> Result<EnvFilter> {
        if self.quiet {
            return Ok(EnvFilter::new("error"));
        }

        let base_level = match self.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base_level));

        if let Some(custom) = &self.filter {
            for directive in custom.split(',').filter(|d| !d.is_empty()) {
                let directive = directive
                    .parse()
                    .map_err(|err| eyre!("invalid log directive {directive:?}: {err}"))?;
                filter = filter.add_directive(directive);
            }
        }
        Ok(filter)
    }
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays clean.
pub(crate) fn init_logging(args: &LogArgs) -> Result<()> {
    let filter = args.env_filter()?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = if args.json {
        builder.json().try_init()
    } else {
        builder.without_time().try_init()
    };
    installed.map_err(|err| eyre!("failed to install log subscriber: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_overrides_verbosity() {
        let args = LogArgs {
            quiet: true,
            verbosity: 3,
            ..Default::default()
        };
        assert_eq!(args.env_filter().unwrap().to_string(), "error");
    }

    #[test]
    fn test_custom_directives() {
        let args = LogArgs {
            filter: Some("strata_blockstore=trace,".to_string()),
            ..Default::default()
        };
        let filter = args.env_filter().unwrap().to_string();
        assert!(filter.contains("strata_blockstore=trace"));

        let bad = LogArgs {
            filter: Some("strata_blockstore=loud".to_string()),
            ..Default::default()
        };
        assert!(bad.env_filter().is_err());
    }
}
