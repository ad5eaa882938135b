//! CLI argument definitions for tickflow.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Bootstrap once, then refresh on a fixed period until Ctrl-C |
//! | `bootstrap` | One bootstrap run, report printed as JSON |
//! | `refresh` | One incremental run, report printed as JSON |
//! | `check-config` | Validate configuration and print the normalized view |
//! | `show` | Print a stored partition with its latest points |
//! | `stocks` | List stored partitions |
//!
//! # Examples
//!
//! ```bash
//! tickflow --config /etc/tickflow.json run
//! tickflow refresh --pretty
//! tickflow show AAPL --interval 1min --limit 10
//! RUST_LOG=tickflow_core=debug tickflow bootstrap
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Rate-limited Twelve Data ingestion worker.
#[derive(Debug, Parser)]
#[command(
    name = "tickflow",
    author,
    version,
    about = "Rate-limited Twelve Data ingestion worker",
    long_about = "tickflow pulls time series for a configured list of (symbol, interval) pairs \
from Twelve Data, respecting the provider's rate limit, and appends only new observations \
to a local DuckDB warehouse.\n\
\n\
Configuration is read from --config, then TICKFLOW_CONFIG, then ./tickflow.json."
)]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log line format (written to stderr).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Pretty-print JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Multi-line, human-readable.
    Pretty,
    /// Single line per event.
    Compact,
    /// One JSON object per event.
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Bootstrap now, then refresh every period until interrupted.
    ///
    /// Exits with code 3 if any job ended suspended.
    Run,

    /// Run one bootstrap and print its report.
    Bootstrap,

    /// Run one incremental refresh and print its report.
    Refresh,

    /// Load and validate the configuration.
    CheckConfig,

    /// Print a stored partition.
    ///
    ///   tickflow show AAPL --interval 1min --limit 10
    Show(ShowArgs),

    /// List stored partitions with point counts.
    Stocks,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Ticker symbol.
    pub symbol: String,

    /// Provider interval name (1min, 5min, ..., 1day, 1week, 1month).
    #[arg(long, short = 'i')]
    pub interval: String,

    /// Number of most recent points to print.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tickflow",
            "show",
            "AAPL",
            "--interval",
            "1min",
            "--log-format",
            "json",
            "--config",
            "/etc/tickflow.json",
        ])
        .expect("valid arguments");

        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/tickflow.json")));
        match cli.command {
            Command::Show(args) => {
                assert_eq!(args.symbol, "AAPL");
                assert_eq!(args.interval, "1min");
                assert_eq!(args.limit, 20);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn check_config_is_kebab_case() {
        let cli = Cli::try_parse_from(["tickflow", "check-config"]).expect("valid arguments");
        assert!(matches!(cli.command, Command::CheckConfig));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn verifies_command_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
