use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{TradingDate, UtcDateTime};
use crate::parser::ParseWarning;

/// Outcome class of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Both durable stores accepted the write.
    Complete,
    /// Exactly one durable store failed after retries.
    Partial,
    /// Neither durable store accepted the write.
    Failed,
    /// Nothing was accepted, so nothing was written.
    Empty,
}

impl IngestStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Empty => "empty",
        }
    }
}

/// Returned to the caller of an ingestion; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionResult {
    pub run_id: Uuid,
    pub trading_date: TradingDate,
    pub status: IngestStatus,
    /// Records that passed validation, repeats included.
    pub accepted_count: usize,
    /// Accepted records whose identity appeared again later in the same
    /// file; only the last occurrence was written.
    pub duplicate_count: usize,
    pub rejected_count: usize,
    pub rejected_reasons: BTreeMap<String, usize>,
    pub warnings: Vec<ParseWarning>,
    pub failed_stores: Vec<String>,
    pub cache_written: bool,
    pub net_new_records: u64,
    pub completed_at: UtcDateTime,
}

impl IngestionResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, IngestStatus::Complete | IngestStatus::Empty)
    }
}
