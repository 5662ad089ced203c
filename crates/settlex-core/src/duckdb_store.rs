//! DuckDB-backed time-series and document stores.
//!
//! DuckDB calls block, so every call runs on the blocking thread pool.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;

use rust_decimal::Decimal;
use settlex_warehouse::{
    DocumentDatabase, DocumentRow, SeriesDatabase, SeriesRow, SummaryRow, WarehouseError,
};
use uuid::Uuid;

use crate::domain::{
    format_iso_date, normalize_decimal, parse_iso_date, CallPut, SettlementRecord, SummaryStatus,
    Symbol, TradingDate, TradingDateSummary, UtcDateTime,
};
use crate::store::{
    DocumentStore, StoreError, StoreFuture, TimeSeriesStore, DOCUMENT_STORE, SERIES_STORE,
};

/// Time-series store over the series database.
#[derive(Clone)]
pub struct DuckDbSeriesStore {
    database: SeriesDatabase,
}

impl DuckDbSeriesStore {
    pub fn open(path: impl Into<PathBuf>, max_pool_size: usize) -> Result<Self, WarehouseError> {
        Ok(Self {
            database: SeriesDatabase::open(path, max_pool_size)?,
        })
    }

    pub fn open_in_memory() -> Result<Self, WarehouseError> {
        Ok(Self {
            database: SeriesDatabase::open_in_memory()?,
        })
    }
}

impl TimeSeriesStore for DuckDbSeriesStore {
    fn write_series<'a>(
        &'a self,
        run_id: Uuid,
        trading_date: TradingDate,
        records: &'a [SettlementRecord],
    ) -> StoreFuture<'a, usize> {
        let rows: Vec<SeriesRow> = records.iter().map(series_row).collect();
        let database = self.database.clone();
        Box::pin(blocking(SERIES_STORE, move || {
            database
                .write_series(&run_id.to_string(), &trading_date.format_iso(), &rows)
                .map_err(|error| warehouse_error(SERIES_STORE, error))
        }))
    }

    fn query_range<'a>(
        &'a self,
        symbol: Option<&'a Symbol>,
        start: TradingDate,
        end: TradingDate,
    ) -> StoreFuture<'a, Vec<SettlementRecord>> {
        let symbol = symbol.map(|symbol| symbol.as_str().to_owned());
        let database = self.database.clone();
        Box::pin(blocking(SERIES_STORE, move || {
            database
                .query_range(symbol.as_deref(), &start.format_iso(), &end.format_iso())
                .map_err(|error| warehouse_error(SERIES_STORE, error))?
                .into_iter()
                .map(record_from_series_row)
                .collect()
        }))
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        let database = self.database.clone();
        Box::pin(blocking(SERIES_STORE, move || {
            database
                .ping()
                .map_err(|error| warehouse_error(SERIES_STORE, error))
        }))
    }
}

/// Document store over the documents database.
#[derive(Clone)]
pub struct DuckDbDocumentStore {
    database: DocumentDatabase,
}

impl DuckDbDocumentStore {
    pub fn open(path: impl Into<PathBuf>, max_pool_size: usize) -> Result<Self, WarehouseError> {
        Ok(Self {
            database: DocumentDatabase::open(path, max_pool_size)?,
        })
    }

    pub fn open_in_memory() -> Result<Self, WarehouseError> {
        Ok(Self {
            database: DocumentDatabase::open_in_memory()?,
        })
    }
}

impl DocumentStore for DuckDbDocumentStore {
    fn upsert_documents<'a>(
        &'a self,
        run_id: Uuid,
        trading_date: TradingDate,
        records: &'a [SettlementRecord],
    ) -> StoreFuture<'a, usize> {
        let rows = records
            .iter()
            .map(document_row)
            .collect::<Result<Vec<_>, _>>();
        let database = self.database.clone();
        Box::pin(async move {
            let rows = rows?;
            blocking(DOCUMENT_STORE, move || {
                database
                    .upsert_documents(&run_id.to_string(), &trading_date.format_iso(), &rows)
                    .map_err(|error| warehouse_error(DOCUMENT_STORE, error))
            })
            .await
        })
    }

    fn query_by_symbol<'a>(
        &'a self,
        symbol: Option<&'a Symbol>,
        trading_date: TradingDate,
    ) -> StoreFuture<'a, Vec<SettlementRecord>> {
        let symbol = symbol.map(|symbol| symbol.as_str().to_owned());
        let database = self.database.clone();
        Box::pin(blocking(DOCUMENT_STORE, move || {
            database
                .query_documents(&trading_date.format_iso(), symbol.as_deref())
                .map_err(|error| warehouse_error(DOCUMENT_STORE, error))?
                .into_iter()
                .map(|row| {
                    serde_json::from_str::<SettlementRecord>(&row.body).map_err(|error| {
                        corrupt(DOCUMENT_STORE, format!("document body: {error}"))
                    })
                })
                .collect()
        }))
    }

    fn upsert_summary<'a>(&'a self, summary: &'a TradingDateSummary) -> StoreFuture<'a, ()> {
        let row = summary_row(summary);
        let database = self.database.clone();
        Box::pin(blocking(DOCUMENT_STORE, move || {
            database
                .upsert_summary(&row)
                .map_err(|error| warehouse_error(DOCUMENT_STORE, error))
        }))
    }

    fn list_dates(&self) -> StoreFuture<'_, Vec<TradingDateSummary>> {
        let database = self.database.clone();
        Box::pin(blocking(DOCUMENT_STORE, move || {
            database
                .list_summaries()
                .map_err(|error| warehouse_error(DOCUMENT_STORE, error))?
                .into_iter()
                .map(summary_from_row)
                .collect()
        }))
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        let database = self.database.clone();
        Box::pin(blocking(DOCUMENT_STORE, move || {
            database
                .ping()
                .map_err(|error| warehouse_error(DOCUMENT_STORE, error))
        }))
    }
}

async fn blocking<T, F>(store: &'static str, task: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|error| StoreError::unavailable(store, format!("blocking task failed: {error}")))?
}

fn warehouse_error(store: &str, error: WarehouseError) -> StoreError {
    match error {
        WarehouseError::DuckDb(error) => StoreError::transient(store, error.to_string()),
        other => StoreError::unavailable(store, other.to_string()),
    }
}

fn corrupt(store: &str, detail: String) -> StoreError {
    StoreError::unavailable(store, format!("corrupt stored data: {detail}"))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn series_row(record: &SettlementRecord) -> SeriesRow {
    SeriesRow {
        trading_date: record.trading_date.format_iso(),
        series: record.series.clone(),
        symbol: record.symbol().map(String::from).unwrap_or_default(),
        expiry: format_iso_date(record.expiry),
        strike: normalize_decimal(record.strike).to_string(),
        call_put: record.call_put.as_str().to_owned(),
        settlement_price: normalize_decimal(record.settlement_price).to_string(),
        volume: to_i64(record.volume),
        open_interest: to_i64(record.open_interest),
    }
}

fn record_from_series_row(row: SeriesRow) -> Result<SettlementRecord, StoreError> {
    let bad = |field: &str, value: &str| corrupt(SERIES_STORE, format!("{field} '{value}'"));
    let trading_date =
        TradingDate::parse(&row.trading_date).map_err(|_| bad("trading_date", &row.trading_date))?;
    let expiry = parse_iso_date(&row.expiry).ok_or_else(|| bad("expiry", &row.expiry))?;
    let strike = Decimal::from_str(&row.strike).map_err(|_| bad("strike", &row.strike))?;
    let settlement_price = Decimal::from_str(&row.settlement_price)
        .map_err(|_| bad("settlement_price", &row.settlement_price))?;
    let call_put = CallPut::from_str(&row.call_put).map_err(|_| bad("call_put", &row.call_put))?;
    let volume = u64::try_from(row.volume).map_err(|_| bad("volume", &row.volume.to_string()))?;
    let open_interest = u64::try_from(row.open_interest)
        .map_err(|_| bad("open_interest", &row.open_interest.to_string()))?;

    Ok(SettlementRecord {
        series: row.series,
        expiry,
        strike,
        call_put,
        settlement_price,
        volume,
        open_interest,
        trading_date,
    }
    .normalized())
}

fn document_row(record: &SettlementRecord) -> Result<DocumentRow, StoreError> {
    let record = record.clone().normalized();
    let body = serde_json::to_string(&record)
        .map_err(|error| StoreError::unavailable(DOCUMENT_STORE, error.to_string()))?;
    Ok(DocumentRow {
        trading_date: record.trading_date.format_iso(),
        series: record.series.clone(),
        expiry: format_iso_date(record.expiry),
        strike: record.strike.to_string(),
        call_put: record.call_put.as_str().to_owned(),
        symbol: record.symbol().map(String::from).unwrap_or_default(),
        body,
    })
}

fn summary_row(summary: &TradingDateSummary) -> SummaryRow {
    SummaryRow {
        trading_date: summary.trading_date.format_iso(),
        record_count: to_i64(summary.record_count),
        symbols: summary.symbols.iter().map(|s| s.as_str().to_owned()).collect(),
        status: summary.status.as_str().to_owned(),
        ingested_at: summary.ingested_at.format_rfc3339(),
    }
}

fn summary_from_row(row: SummaryRow) -> Result<TradingDateSummary, StoreError> {
    let bad = |field: &str, value: &str| corrupt(DOCUMENT_STORE, format!("{field} '{value}'"));
    let symbols = row
        .symbols
        .iter()
        .map(|symbol| Symbol::parse(symbol).map_err(|_| bad("symbol", symbol)))
        .collect::<Result<BTreeSet<_>, _>>()?;

    Ok(TradingDateSummary {
        trading_date: TradingDate::parse(&row.trading_date)
            .map_err(|_| bad("trading_date", &row.trading_date))?,
        record_count: u64::try_from(row.record_count)
            .map_err(|_| bad("record_count", &row.record_count.to_string()))?,
        symbols,
        ingested_at: UtcDateTime::parse(&row.ingested_at)
            .map_err(|_| bad("ingested_at", &row.ingested_at))?,
        status: SummaryStatus::parse(&row.status).ok_or_else(|| bad("status", &row.status))?,
    })
}
