use settlex_core::{HealthState, SettlementService};

use crate::error::CliError;

use super::CommandResult;

/// Exit code 6 when any collaborator is down.
pub async fn run(service: &SettlementService) -> Result<CommandResult, CliError> {
    let report = service.health().await;
    let down: Vec<String> = report
        .collaborators
        .iter()
        .filter(|(_, state)| **state == HealthState::Down)
        .map(|(name, _)| format!("{name} is down"))
        .collect();

    let exit_code = if report.all_up() { 0 } else { 6 };
    Ok(CommandResult::ok(serde_json::to_value(&report)?)
        .with_warnings(down)
        .with_exit_code(exit_code))
}
