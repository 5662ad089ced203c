use std::time::Duration;

use settlex_core::{IngestOptions, IngestStatus, SettlementService};
use tracing::info;

use crate::cli::IngestArgs;
use crate::error::CliError;

use super::{parse_date, CommandResult};

pub async fn run(
    args: &IngestArgs,
    service: &SettlementService,
) -> Result<CommandResult, CliError> {
    let trading_date = parse_date(&args.date)?;
    let options = match args.timeout_ms {
        Some(0) => {
            return Err(CliError::Usage(String::from(
                "--timeout-ms must be greater than zero",
            )))
        }
        Some(timeout_ms) => IngestOptions::with_deadline(Duration::from_millis(timeout_ms)),
        None => IngestOptions::default(),
    };

    let result = match &args.file {
        Some(path) => {
            info!(%trading_date, path = %path.display(), "ingesting local file");
            let raw = tokio::fs::read(path).await?;
            service.ingest_bytes(trading_date, &raw, options).await?
        }
        None => service.ingest(trading_date, options).await?,
    };

    let mut warnings: Vec<String> = result
        .warnings
        .iter()
        .map(|warning| {
            if warning.is_structural() {
                format!("file: {}", warning.reason)
            } else {
                format!("line {}: {}", warning.line_number, warning.reason)
            }
        })
        .collect();
    warnings.extend(
        result
            .failed_stores
            .iter()
            .map(|store| format!("{store} store write failed")),
    );

    let exit_code = match result.status {
        IngestStatus::Partial | IngestStatus::Failed => 3,
        IngestStatus::Complete | IngestStatus::Empty => 0,
    };
    Ok(CommandResult::ok(serde_json::to_value(&result)?)
        .with_warnings(warnings)
        .with_exit_code(exit_code))
}
