//! # Settlex Warehouse
//!
//! DuckDB persistence for settlement data.
//!
//! Two databases are opened independently so that each one can fail on its
//! own:
//!
//! | Database | Type | Tables |
//! |----------|------|--------|
//! | series | [`SeriesDatabase`] | `settlement_series`, `ingest_log` |
//! | documents | [`DocumentDatabase`] | `settlement_documents`, `trading_dates`, `ingest_log` |
//!
//! Rows cross this boundary as plain strings and integers. Dates are
//! `YYYY-MM-DD`, decimals are canonical decimal text; the caller owns their
//! typed representation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use settlex_warehouse::{SeriesDatabase, SeriesRow};
//!
//! fn main() -> Result<(), settlex_warehouse::WarehouseError> {
//!     let series = SeriesDatabase::open_in_memory()?;
//!     let row = SeriesRow {
//!         trading_date: "2023-08-22".to_string(),
//!         series: "HTI2308".to_string(),
//!         symbol: "HTI".to_string(),
//!         expiry: "2023-08-30".to_string(),
//!         strike: "18000".to_string(),
//!         call_put: "Call".to_string(),
//!         settlement_price: "0.1234".to_string(),
//!         volume: 100,
//!         open_interest: 50,
//!     };
//!     series.write_series("run-1", "2023-08-22", &[row])?;
//!     let rows = series.query_range(Some("HTI"), "2023-08-22", "2023-08-22")?;
//!     assert_eq!(rows.len(), 1);
//!     Ok(())
//! }
//! ```

pub mod duckdb;
mod migrations;

use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{Connection, ToSql};
use thiserror::Error;

pub use duckdb::{DatabaseLocation, DuckDbConnectionManager, PooledConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (creating database directories).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON encoding of stored columns failed.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// A pool mutex was poisoned by a panicking holder.
    #[error("connection pool lock poisoned")]
    PoolPoisoned,
}

/// File locations of the two settlement databases.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Path to the series (time-series) database file.
    pub series_db_path: PathBuf,
    /// Path to the documents database file.
    pub documents_db_path: PathBuf,
    /// Maximum number of idle connections kept per database.
    pub max_pool_size: usize,
}

impl WarehouseConfig {
    /// Standard layout below a settlex home directory.
    pub fn under(home: impl AsRef<Path>) -> Self {
        let db_dir = home.as_ref().join("db");
        Self {
            series_db_path: db_dir.join("series.duckdb"),
            documents_db_path: db_dir.join("documents.duckdb"),
            max_pool_size: 4,
        }
    }
}

/// One option contract's settlement as stored in the series database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRow {
    pub trading_date: String,
    pub series: String,
    pub symbol: String,
    pub expiry: String,
    pub strike: String,
    pub call_put: String,
    pub settlement_price: String,
    pub volume: i64,
    pub open_interest: i64,
}

/// A settlement document and the identity columns it is keyed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRow {
    pub trading_date: String,
    pub series: String,
    pub expiry: String,
    pub strike: String,
    pub call_put: String,
    pub symbol: String,
    /// JSON body of the document.
    pub body: String,
}

/// Per-date ingestion summary kept in the documents database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub trading_date: String,
    pub record_count: i64,
    pub symbols: Vec<String>,
    pub status: String,
    /// RFC 3339 completion time of the ingestion.
    pub ingested_at: String,
}

/// The time-series store: one row per contract per trading date.
#[derive(Clone)]
pub struct SeriesDatabase {
    manager: DuckDbConnectionManager,
}

impl SeriesDatabase {
    /// Open (creating if needed) a series database file.
    pub fn open(path: impl Into<PathBuf>, max_pool_size: usize) -> Result<Self, WarehouseError> {
        let manager = open_manager(path.into(), max_pool_size)?;
        let database = Self { manager };
        database.initialize()?;
        Ok(database)
    }

    /// Open a private in-memory series database.
    pub fn open_in_memory() -> Result<Self, WarehouseError> {
        let manager = DuckDbConnectionManager::open(DatabaseLocation::InMemory, 2)?;
        let database = Self { manager };
        database.initialize()?;
        Ok(database)
    }

    fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection, migrations::SERIES_MIGRATIONS)?;
        Ok(())
    }

    /// Location of the underlying database.
    pub fn location(&self) -> &DatabaseLocation {
        self.manager.location()
    }

    /// Upsert rows for one trading date in a single transaction.
    ///
    /// Rows are keyed on `(trading_date, series, expiry, strike, call_put)`;
    /// writing the same key again replaces the stored row. Callers must not
    /// repeat a key within one call.
    pub fn write_series(
        &self,
        run_id: &str,
        trading_date: &str,
        rows: &[SeriesRow],
    ) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            for row in rows {
                let params: [&dyn ToSql; 10] = [
                    &row.trading_date,
                    &row.series,
                    &row.expiry,
                    &row.strike,
                    &row.call_put,
                    &row.symbol,
                    &row.settlement_price,
                    &row.volume,
                    &row.open_interest,
                    &run_id,
                ];
                connection.execute(
                    "INSERT OR REPLACE INTO settlement_series \
                     (trading_date, series, expiry, strike, call_put, symbol, settlement_price, \
                      volume, open_interest, run_id, updated_at) \
                     VALUES (CAST(? AS DATE), ?, CAST(? AS DATE), CAST(? AS DECIMAL(18, 6)), ?, ?, \
                             CAST(? AS DECIMAL(18, 6)), ?, ?, ?, CURRENT_TIMESTAMP)",
                    params.as_slice(),
                )?;
            }

            append_ingest_log(&connection, run_id, trading_date, rows.len(), "ok")?;
            Ok(rows.len())
        })();

        finalize_transaction(&connection, result)
    }

    /// Rows with `start <= trading_date <= end`, optionally for one symbol.
    pub fn query_range(
        &self,
        symbol: Option<&str>,
        start: &str,
        end: &str,
    ) -> Result<Vec<SeriesRow>, WarehouseError> {
        const COLUMNS: &str = "SELECT CAST(trading_date AS VARCHAR), series, symbol, \
             CAST(expiry AS VARCHAR), CAST(strike AS VARCHAR), call_put, \
             CAST(settlement_price AS VARCHAR), volume, open_interest \
             FROM settlement_series \
             WHERE trading_date BETWEEN CAST(? AS DATE) AND CAST(? AS DATE)";
        const ORDER: &str = " ORDER BY trading_date, series, expiry, call_put, strike";

        let connection = self.manager.acquire()?;
        let (sql, params): (String, Vec<&dyn ToSql>) = match &symbol {
            Some(symbol) => (
                format!("{COLUMNS} AND symbol = ?{ORDER}"),
                vec![&start as &dyn ToSql, &end, symbol],
            ),
            None => (format!("{COLUMNS}{ORDER}"), vec![&start as &dyn ToSql, &end]),
        };

        let mut statement = connection.prepare(&sql)?;
        let rows = statement
            .query_map(params.as_slice(), |row| {
                Ok(SeriesRow {
                    trading_date: row.get(0)?,
                    series: row.get(1)?,
                    symbol: row.get(2)?,
                    expiry: row.get(3)?,
                    strike: row.get(4)?,
                    call_put: row.get(5)?,
                    settlement_price: row.get(6)?,
                    volume: row.get(7)?,
                    open_interest: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Cheap liveness probe.
    pub fn ping(&self) -> Result<(), WarehouseError> {
        ping(&self.manager)
    }
}

/// The document store: JSON documents plus trading date summaries.
#[derive(Clone)]
pub struct DocumentDatabase {
    manager: DuckDbConnectionManager,
}

impl DocumentDatabase {
    /// Open (creating if needed) a documents database file.
    pub fn open(path: impl Into<PathBuf>, max_pool_size: usize) -> Result<Self, WarehouseError> {
        let manager = open_manager(path.into(), max_pool_size)?;
        let database = Self { manager };
        database.initialize()?;
        Ok(database)
    }

    /// Open a private in-memory documents database.
    pub fn open_in_memory() -> Result<Self, WarehouseError> {
        let manager = DuckDbConnectionManager::open(DatabaseLocation::InMemory, 2)?;
        let database = Self { manager };
        database.initialize()?;
        Ok(database)
    }

    fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection, migrations::DOCUMENT_MIGRATIONS)?;
        Ok(())
    }

    /// Location of the underlying database.
    pub fn location(&self) -> &DatabaseLocation {
        self.manager.location()
    }

    /// Upsert documents for one trading date in a single transaction.
    pub fn upsert_documents(
        &self,
        run_id: &str,
        trading_date: &str,
        rows: &[DocumentRow],
    ) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            for row in rows {
                let params: [&dyn ToSql; 8] = [
                    &row.trading_date,
                    &row.series,
                    &row.expiry,
                    &row.strike,
                    &row.call_put,
                    &row.symbol,
                    &row.body,
                    &run_id,
                ];
                connection.execute(
                    "INSERT OR REPLACE INTO settlement_documents \
                     (trading_date, series, expiry, strike, call_put, symbol, body, run_id, updated_at) \
                     VALUES (CAST(? AS DATE), ?, CAST(? AS DATE), ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
                    params.as_slice(),
                )?;
            }

            append_ingest_log(&connection, run_id, trading_date, rows.len(), "ok")?;
            Ok(rows.len())
        })();

        finalize_transaction(&connection, result)
    }

    /// Documents stored for one trading date, optionally for one symbol.
    pub fn query_documents(
        &self,
        trading_date: &str,
        symbol: Option<&str>,
    ) -> Result<Vec<DocumentRow>, WarehouseError> {
        const COLUMNS: &str = "SELECT CAST(trading_date AS VARCHAR), series, \
             CAST(expiry AS VARCHAR), strike, call_put, symbol, body \
             FROM settlement_documents WHERE trading_date = CAST(? AS DATE)";
        const ORDER: &str = " ORDER BY series, expiry, call_put, strike";

        let connection = self.manager.acquire()?;
        let (sql, params): (String, Vec<&dyn ToSql>) = match &symbol {
            Some(symbol) => (
                format!("{COLUMNS} AND symbol = ?{ORDER}"),
                vec![&trading_date as &dyn ToSql, symbol],
            ),
            None => (format!("{COLUMNS}{ORDER}"), vec![&trading_date as &dyn ToSql]),
        };

        let mut statement = connection.prepare(&sql)?;
        let rows = statement
            .query_map(params.as_slice(), |row| {
                Ok(DocumentRow {
                    trading_date: row.get(0)?,
                    series: row.get(1)?,
                    expiry: row.get(2)?,
                    strike: row.get(3)?,
                    call_put: row.get(4)?,
                    symbol: row.get(5)?,
                    body: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Insert or replace the summary for `summary.trading_date`.
    pub fn upsert_summary(&self, summary: &SummaryRow) -> Result<(), WarehouseError> {
        let symbols = serde_json::to_string(&summary.symbols)?;
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 5] = [
            &summary.trading_date,
            &summary.record_count,
            &symbols,
            &summary.status,
            &summary.ingested_at,
        ];
        connection.execute(
            "INSERT OR REPLACE INTO trading_dates \
             (trading_date, record_count, symbols, status, ingested_at) \
             VALUES (CAST(? AS DATE), ?, ?, ?, ?)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// All summaries, most recent trading date first.
    pub fn list_summaries(&self) -> Result<Vec<SummaryRow>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT CAST(trading_date AS VARCHAR), record_count, symbols, status, ingested_at \
             FROM trading_dates ORDER BY trading_date DESC",
        )?;
        let raw = statement
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(trading_date, record_count, symbols, status, ingested_at)| {
                Ok(SummaryRow {
                    trading_date,
                    record_count,
                    symbols: serde_json::from_str(&symbols)?,
                    status,
                    ingested_at,
                })
            })
            .collect()
    }

    /// Cheap liveness probe.
    pub fn ping(&self) -> Result<(), WarehouseError> {
        ping(&self.manager)
    }
}

fn open_manager(path: PathBuf, max_pool_size: usize) -> Result<DuckDbConnectionManager, WarehouseError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    DuckDbConnectionManager::open(DatabaseLocation::File(path), max_pool_size)
}

fn ping(manager: &DuckDbConnectionManager) -> Result<(), WarehouseError> {
    let connection = manager.acquire()?;
    let _: i64 = connection.query_row("SELECT 1", [], |row| row.get(0))?;
    Ok(())
}

fn append_ingest_log(
    connection: &Connection,
    run_id: &str,
    trading_date: &str,
    record_count: usize,
    status: &str,
) -> Result<(), WarehouseError> {
    let record_count = i64::try_from(record_count).unwrap_or(i64::MAX);
    let params: [&dyn ToSql; 4] = [&run_id, &trading_date, &record_count, &status];
    connection.execute(
        "INSERT INTO ingest_log (run_id, trading_date, record_count, status, timestamp) \
         VALUES (?, CAST(? AS DATE), ?, ?, CURRENT_TIMESTAMP)",
        params.as_slice(),
    )?;
    Ok(())
}

/// Commit on success, roll back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn series_row(series: &str, strike: &str, call_put: &str, volume: i64) -> SeriesRow {
        SeriesRow {
            trading_date: "2023-08-22".to_string(),
            series: series.to_string(),
            symbol: series.trim_end_matches(|c: char| c.is_ascii_digit()).to_string(),
            expiry: "2023-08-30".to_string(),
            strike: strike.to_string(),
            call_put: call_put.to_string(),
            settlement_price: "12.5".to_string(),
            volume,
            open_interest: 10,
        }
    }

    fn document_row(series: &str, strike: &str, body: &str) -> DocumentRow {
        DocumentRow {
            trading_date: "2023-08-22".to_string(),
            series: series.to_string(),
            expiry: "2023-08-30".to_string(),
            strike: strike.to_string(),
            call_put: "Put".to_string(),
            symbol: "HTI".to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn series_upsert_replaces_same_identity() {
        let database = SeriesDatabase::open_in_memory().expect("open");
        database
            .write_series("run-1", "2023-08-22", &[series_row("HTI2308", "18000", "Call", 100)])
            .expect("first write");
        database
            .write_series("run-2", "2023-08-22", &[series_row("HTI2308", "18000.0", "Call", 250)])
            .expect("second write");

        let rows = database
            .query_range(None, "2023-08-22", "2023-08-22")
            .expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].volume, 250);
        assert_eq!(rows[0].trading_date, "2023-08-22");
    }

    #[test]
    fn series_range_filters_symbol_and_dates() {
        let database = SeriesDatabase::open_in_memory().expect("open");
        database
            .write_series(
                "run-1",
                "2023-08-22",
                &[
                    series_row("HTI2308", "18000", "Call", 100),
                    series_row("HSI2308", "19000", "Put", 80),
                ],
            )
            .expect("write");

        let hti = database
            .query_range(Some("HTI"), "2023-08-01", "2023-08-31")
            .expect("query");
        assert_eq!(hti.len(), 1);
        assert_eq!(hti[0].series, "HTI2308");

        let outside = database
            .query_range(None, "2023-09-01", "2023-09-30")
            .expect("query");
        assert!(outside.is_empty());
    }

    #[test]
    fn documents_round_trip_and_filter_by_symbol() {
        let database = DocumentDatabase::open_in_memory().expect("open");
        database
            .upsert_documents(
                "run-1",
                "2023-08-22",
                &[document_row("HTI2308", "18000", r#"{"v":1}"#)],
            )
            .expect("upsert");
        database
            .upsert_documents(
                "run-2",
                "2023-08-22",
                &[document_row("HTI2308", "18000", r#"{"v":2}"#)],
            )
            .expect("upsert again");

        let rows = database
            .query_documents("2023-08-22", Some("HTI"))
            .expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].body, r#"{"v":2}"#);
        assert!(database
            .query_documents("2023-08-22", Some("HSI"))
            .expect("query")
            .is_empty());
    }

    #[test]
    fn summaries_are_listed_most_recent_first() {
        let database = DocumentDatabase::open_in_memory().expect("open");
        for date in ["2023-08-21", "2023-08-23", "2023-08-22"] {
            database
                .upsert_summary(&SummaryRow {
                    trading_date: date.to_string(),
                    record_count: 4,
                    symbols: vec!["HTI".to_string()],
                    status: "complete".to_string(),
                    ingested_at: "2023-08-23T10:00:00Z".to_string(),
                })
                .expect("summary");
        }

        let dates: Vec<String> = database
            .list_summaries()
            .expect("list")
            .into_iter()
            .map(|summary| summary.trading_date)
            .collect();
        assert_eq!(dates, vec!["2023-08-23", "2023-08-22", "2023-08-21"]);
    }

    #[test]
    fn file_backed_databases_survive_reopen() {
        let temp = tempdir().expect("tempdir");
        let config = WarehouseConfig::under(temp.path());

        {
            let series = SeriesDatabase::open(&config.series_db_path, config.max_pool_size)
                .expect("open series");
            series
                .write_series("run-1", "2023-08-22", &[series_row("HTI2308", "18000", "Call", 100)])
                .expect("write");
        }

        let reopened = SeriesDatabase::open(&config.series_db_path, config.max_pool_size)
            .expect("reopen series");
        let rows = reopened
            .query_range(Some("HTI"), "2023-08-22", "2023-08-22")
            .expect("query");
        assert_eq!(rows.len(), 1);
        assert!(config.documents_db_path.ends_with("db/documents.duckdb"));
    }
}
