use serde::Serialize;
use serde_json::Value;
use settlex_core::{QuerySource, UtcDateTime};

use crate::cli::OutputFormat;
use crate::commands::CommandResult;
use crate::error::CliError;

/// What every command prints on stdout.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub meta: EnvelopeMeta,
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct EnvelopeMeta {
    pub command: &'static str,
    pub generated_at: UtcDateTime,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<QuerySource>,
    pub warnings: Vec<String>,
}

impl Envelope {
    pub fn from_result(command: &'static str, result: CommandResult) -> Self {
        Self {
            meta: EnvelopeMeta {
                command,
                generated_at: UtcDateTime::now(),
                latency_ms: result.latency_ms,
                source: result.source,
                warnings: result.warnings,
            },
            data: result.data,
        }
    }
}

pub fn render(envelope: &Envelope, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let payload = if pretty {
                serde_json::to_string_pretty(envelope)?
            } else {
                serde_json::to_string(envelope)?
            };
            println!("{payload}");
        }
        OutputFormat::Table => render_table(envelope)?,
    }
    Ok(())
}

fn render_table(envelope: &Envelope) -> Result<(), CliError> {
    println!("command     : {}", envelope.meta.command);
    println!("generated_at: {}", envelope.meta.generated_at);
    println!("latency_ms  : {}", envelope.meta.latency_ms);
    if let Some(source) = envelope.meta.source {
        println!("source      : {}", serde_json::to_string(&source)?.trim_matches('"'));
    }

    if !envelope.meta.warnings.is_empty() {
        println!("warnings:");
        for warning in &envelope.meta.warnings {
            println!("  - {warning}");
        }
    }

    println!("data:");
    match &envelope.data {
        Value::Array(rows) if rows.iter().all(Value::is_object) && !rows.is_empty() => {
            for line in table_lines(rows) {
                println!("  {line}");
            }
        }
        other => {
            for line in serde_json::to_string_pretty(other)?.lines() {
                println!("  {line}");
            }
        }
    }
    Ok(())
}

/// Column-aligned rows; columns follow the first object's key order.
fn table_lines(rows: &[Value]) -> Vec<String> {
    let columns: Vec<String> = rows
        .first()
        .and_then(Value::as_object)
        .map(|first| first.keys().cloned().collect())
        .unwrap_or_default();

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| match row.get(column) {
                    Some(Value::String(text)) => text.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(value) => value.to_string(),
                })
                .collect()
        })
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            cells
                .iter()
                .map(|row| row[index].len())
                .chain(std::iter::once(column.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let format_row = |values: &[String]| {
        values
            .iter()
            .zip(&widths)
            .map(|(value, width)| format!("{value:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_owned()
    };

    let mut lines = vec![format_row(&columns)];
    lines.extend(cells.iter().map(|row| format_row(row)));
    lines
}
