//! Settlement domain model.

mod ingestion;
mod record;
mod symbol;
mod timestamp;
mod trading_date;

pub use ingestion::{IngestStatus, IngestionResult};
pub use record::{
    normalize_decimal, CallPut, RecordKey, SettlementCandidate, SettlementRecord, SummaryStatus,
    TradingDateSummary, PRICE_SCALE,
};
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
pub use trading_date::TradingDate;

pub(crate) use trading_date::{format_iso_date, parse_iso_date};
