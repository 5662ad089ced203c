mod health;
mod ingest;
mod query;

use std::time::Instant;

use serde_json::Value;
use settlex_core::{QuerySource, SettlementService, SettlexConfig, TradingDate};

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub source: Option<QuerySource>,
    pub latency_ms: u64,
    /// Non-zero when the command ran but did not fully succeed.
    pub exit_code: u8,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            source: None,
            latency_ms: 0,
            exit_code: 0,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_source(mut self, source: QuerySource) -> Self {
        if source == QuerySource::Degraded {
            self.warnings
                .push(String::from("one durable store was unavailable; results may be incomplete"));
        }
        self.source = Some(source);
        self
    }

    pub fn with_exit_code(mut self, exit_code: u8) -> Self {
        self.exit_code = exit_code;
        self
    }
}

pub fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Ingest(_) => "ingest",
        Command::Records(_) => "records",
        Command::Search(_) => "search",
        Command::Dates => "dates",
        Command::Symbols(_) => "symbols",
        Command::Health => "health",
    }
}

pub async fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    let config = SettlexConfig::from_env()?;
    let service = SettlementService::open(&config)?;
    let started = Instant::now();

    let mut result = match &cli.command {
        Command::Ingest(args) => ingest::run(args, &service).await?,
        Command::Records(args) => query::records(args, &service).await?,
        Command::Search(args) => query::search(args, &service).await?,
        Command::Dates => query::dates(&service).await?,
        Command::Symbols(args) => query::symbols(args, &service).await?,
        Command::Health => health::run(&service).await?,
    };
    result.latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    Ok(result)
}

fn parse_date(value: &str) -> Result<TradingDate, CliError> {
    Ok(TradingDate::parse(value.trim())?)
}
