use serde_json::json;
use settlex_core::{QueryResult, SettlementQuery, SettlementService, Symbol};

use crate::cli::{DateArgs, SearchArgs};
use crate::error::CliError;

use super::{parse_date, CommandResult};

pub async fn records(
    args: &DateArgs,
    service: &SettlementService,
) -> Result<CommandResult, CliError> {
    let trading_date = parse_date(&args.date)?;
    run(service, SettlementQuery::ByDateAll { trading_date }).await
}

pub async fn symbols(
    args: &DateArgs,
    service: &SettlementService,
) -> Result<CommandResult, CliError> {
    let trading_date = parse_date(&args.date)?;
    run(service, SettlementQuery::SymbolsForDate { trading_date }).await
}

pub async fn dates(service: &SettlementService) -> Result<CommandResult, CliError> {
    run(service, SettlementQuery::ListDates).await
}

/// Without `--date` or a range, search the latest ingested date.
pub async fn search(
    args: &SearchArgs,
    service: &SettlementService,
) -> Result<CommandResult, CliError> {
    let symbol = Symbol::parse(args.symbol.trim())?;
    let (start, end) = match (&args.date, &args.start, &args.end) {
        (Some(date), _, _) => {
            let date = parse_date(date)?;
            (date, date)
        }
        (None, Some(start), Some(end)) => (parse_date(start)?, parse_date(end)?),
        _ => match service.latest_trading_date().await? {
            Some(latest) => (latest, latest),
            None => {
                return Ok(CommandResult::ok(json!([]))
                    .with_warnings(vec![String::from("no trading dates ingested yet")]))
            }
        },
    };

    run(
        service,
        SettlementQuery::BySymbolAndDateRange { symbol, start, end },
    )
    .await
}

async fn run(
    service: &SettlementService,
    query: SettlementQuery,
) -> Result<CommandResult, CliError> {
    let outcome = service.query(&query).await?;
    let data = match &outcome.result {
        QueryResult::Records(records) => serde_json::to_value(records)?,
        QueryResult::Dates(dates) => serde_json::to_value(dates)?,
        QueryResult::Symbols(symbols) => serde_json::to_value(symbols)?,
    };
    Ok(CommandResult::ok(data).with_source(outcome.source))
}
