//! CLI argument definitions for settlex.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ingest` | Fetch (or read) and store one trading date's settlement file |
//! | `records` | All records for a trading date |
//! | `search` | Records for one symbol over a date range |
//! | `dates` | Ingested trading dates, newest first |
//! | `symbols` | Symbols present on a trading date |
//! | `health` | Reachability of the cache and both stores |
//!
//! # Examples
//!
//! ```bash
//! settlex ingest 2023-08-22
//! settlex ingest 2023-08-22 --file ./sp220823.dat
//! settlex search HTI --start 2023-08-01 --end 2023-08-31 --pretty
//! settlex --format table dates
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// HKEX daily settlement file ingestion and query tool.
#[derive(Debug, Parser)]
#[command(name = "settlex", author, version, about)]
pub struct Cli {
    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest the settlement file for a trading date.
    Ingest(IngestArgs),
    /// List every record of a trading date.
    Records(DateArgs),
    /// Records for one symbol.
    Search(SearchArgs),
    /// List ingested trading dates.
    Dates,
    /// List symbols present on a trading date.
    Symbols(DateArgs),
    /// Check the cache and both durable stores.
    Health,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Trading date, YYYY-MM-DD.
    pub date: String,

    /// Read the file from disk instead of downloading it.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Overall deadline for the ingestion in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Args)]
pub struct DateArgs {
    /// Trading date, YYYY-MM-DD.
    pub date: String,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Underlying symbol, e.g. HTI.
    pub symbol: String,

    /// Single trading date. Defaults to the latest ingested date.
    #[arg(long, conflicts_with_all = ["start", "end"])]
    pub date: Option<String>,

    /// Range start, inclusive.
    #[arg(long, requires = "end")]
    pub start: Option<String>,

    /// Range end, inclusive.
    #[arg(long, requires = "start")]
    pub end: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["settlex", "dates", "--pretty", "--format", "table"])
            .expect("parse");
        assert!(cli.pretty);
        assert_eq!(cli.format, OutputFormat::Table);
        assert!(matches!(cli.command, Command::Dates));
    }

    #[test]
    fn search_range_needs_both_ends() {
        assert!(Cli::try_parse_from(["settlex", "search", "HTI", "--start", "2023-08-01"]).is_err());
        assert!(Cli::try_parse_from([
            "settlex", "search", "HTI", "--date", "2023-08-22", "--start", "2023-08-01", "--end",
            "2023-08-31",
        ])
        .is_err());
    }

    #[test]
    fn ingest_accepts_file_and_deadline() {
        let cli = Cli::try_parse_from([
            "settlex",
            "ingest",
            "2023-08-22",
            "--file",
            "sp220823.dat",
            "--timeout-ms",
            "5000",
        ])
        .expect("parse");
        let Command::Ingest(args) = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(args.file, Some(PathBuf::from("sp220823.dat")));
        assert_eq!(args.timeout_ms, Some(5000));
    }
}
