//! Cache-first reads.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::StoreCoordinator;
use crate::domain::{RecordKey, SettlementRecord, Symbol, TradingDate, TradingDateSummary};
use crate::store::{StoreError, DOCUMENT_STORE, SERIES_STORE};

const KEY_PREFIX: &str = "settlement:v1";

/// Prefix of every cache key that belongs to range queries.
pub const RANGE_PREFIX: &str = "settlement:v1:range:";

/// Cache key of the trading date listing.
pub const DATES_KEY: &str = "settlement:v1:dates";

/// Prefix of every cache key scoped to one trading date.
pub fn date_prefix(trading_date: TradingDate) -> String {
    format!("{KEY_PREFIX}:date:{trading_date}:")
}

/// The query shapes the coordinator serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementQuery {
    ByDateAll {
        trading_date: TradingDate,
    },
    BySymbolAndDateRange {
        symbol: Symbol,
        start: TradingDate,
        end: TradingDate,
    },
    ListDates,
    SymbolsForDate {
        trading_date: TradingDate,
    },
}

impl SettlementQuery {
    /// Records of one symbol on one trading date.
    pub fn symbol_on(symbol: Symbol, trading_date: TradingDate) -> Self {
        Self::BySymbolAndDateRange {
            symbol,
            start: trading_date,
            end: trading_date,
        }
    }

    pub fn cache_key(&self) -> String {
        match self {
            Self::ByDateAll { trading_date } => format!("{}all", date_prefix(*trading_date)),
            Self::SymbolsForDate { trading_date } => {
                format!("{}symbols", date_prefix(*trading_date))
            }
            Self::BySymbolAndDateRange { symbol, start, end } => {
                format!("{RANGE_PREFIX}{symbol}:{start}:{end}")
            }
            Self::ListDates => DATES_KEY.to_owned(),
        }
    }

    fn check(&self) -> Result<(), QueryError> {
        match self {
            Self::BySymbolAndDateRange { start, end, .. } if start > end => {
                Err(QueryError::InvalidQuery(format!(
                    "range start {start} is after end {end}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Query payload; this is also what gets cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "items", rename_all = "snake_case")]
pub enum QueryResult {
    Records(Vec<SettlementRecord>),
    Dates(Vec<TradingDateSummary>),
    Symbols(Vec<Symbol>),
}

impl QueryResult {
    pub fn len(&self) -> usize {
        match self {
            Self::Records(records) => records.len(),
            Self::Dates(dates) => dates.len(),
            Self::Symbols(symbols) => symbols.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Option<&[SettlementRecord]> {
        match self {
            Self::Records(records) => Some(records),
            _ => None,
        }
    }
}

/// Where a query result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuerySource {
    Cache,
    Durable,
    /// One durable store failed; the other's rows were returned uncached.
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub result: QueryResult,
    pub source: QuerySource,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Sort by identity and keep one copy per identity.
pub(crate) fn merge_records(
    sources: impl IntoIterator<Item = Vec<SettlementRecord>>,
) -> Vec<SettlementRecord> {
    let mut merged: BTreeMap<RecordKey, SettlementRecord> = BTreeMap::new();
    for records in sources {
        for record in records {
            merged.entry(record.key()).or_insert(record);
        }
    }
    merged.into_values().collect()
}

pub(crate) fn symbols_of(records: &[SettlementRecord]) -> BTreeSet<Symbol> {
    records.iter().filter_map(SettlementRecord::symbol).collect()
}

impl StoreCoordinator {
    /// Serve `query` from cache, falling back to durable storage.
    pub async fn query(&self, query: &SettlementQuery) -> Result<QueryOutcome, QueryError> {
        query.check()?;
        let key = query.cache_key();

        match self.cache.get(&key).await {
            Ok(Some(body)) => match serde_json::from_str::<QueryResult>(&body) {
                Ok(result) => {
                    debug!(%key, "cache hit");
                    return Ok(QueryOutcome {
                        result,
                        source: QuerySource::Cache,
                    });
                }
                Err(error) => warn!(%key, %error, "discarding undecodable cache entry"),
            },
            Ok(None) => debug!(%key, "cache miss"),
            Err(error) => warn!(%key, %error, "cache read failed, treating as miss"),
        }

        let generation = self.current_generation().await;
        let (result, source) = self.read_durable(query).await?;
        if source == QuerySource::Durable {
            self.fill(key, &result, self.ttl_for(query), generation)
                .await;
        }
        Ok(QueryOutcome { result, source })
    }

    fn ttl_for(&self, query: &SettlementQuery) -> Duration {
        match query {
            SettlementQuery::ListDates => self.ttls.dates,
            _ => self.ttls.query,
        }
    }

    async fn read_durable(
        &self,
        query: &SettlementQuery,
    ) -> Result<(QueryResult, QuerySource), QueryError> {
        match query {
            SettlementQuery::ByDateAll { trading_date } => {
                let records = self
                    .retry
                    .run(SERIES_STORE, None, |_| {
                        self.series.query_range(None, *trading_date, *trading_date)
                    })
                    .await?;
                Ok((
                    QueryResult::Records(merge_records([records])),
                    QuerySource::Durable,
                ))
            }
            SettlementQuery::BySymbolAndDateRange { symbol, start, end } => {
                let (series, documents) = tokio::join!(
                    self.retry.run(SERIES_STORE, None, |_| {
                        self.series.query_range(Some(symbol), *start, *end)
                    }),
                    self.documents_in_range(symbol, *start, *end),
                );
                match (series, documents) {
                    (Ok(series), Ok(documents)) => Ok((
                        QueryResult::Records(merge_records([series, documents])),
                        QuerySource::Durable,
                    )),
                    (Ok(records), Err(error)) | (Err(error), Ok(records)) => {
                        warn!(
                            %symbol,
                            %start,
                            %end,
                            store = error.store(),
                            %error,
                            "range read degraded to a single durable store"
                        );
                        Ok((
                            QueryResult::Records(merge_records([records])),
                            QuerySource::Degraded,
                        ))
                    }
                    (Err(error), Err(_)) => Err(QueryError::Store(error)),
                }
            }
            SettlementQuery::ListDates => {
                let mut dates = self
                    .retry
                    .run(DOCUMENT_STORE, None, |_| self.documents.list_dates())
                    .await?;
                dates.sort_by(|a, b| b.trading_date.cmp(&a.trading_date));
                Ok((QueryResult::Dates(dates), QuerySource::Durable))
            }
            SettlementQuery::SymbolsForDate { trading_date } => {
                let records = self
                    .retry
                    .run(DOCUMENT_STORE, None, |_| {
                        self.documents.query_by_symbol(None, *trading_date)
                    })
                    .await?;
                Ok((
                    QueryResult::Symbols(symbols_of(&records).into_iter().collect()),
                    QuerySource::Durable,
                ))
            }
        }
    }

    /// Document-store rows for `symbol` across every ingested date in range.
    async fn documents_in_range(
        &self,
        symbol: &Symbol,
        start: TradingDate,
        end: TradingDate,
    ) -> Result<Vec<SettlementRecord>, StoreError> {
        let dates: Vec<TradingDate> = if start == end {
            vec![start]
        } else {
            self.retry
                .run(DOCUMENT_STORE, None, |_| self.documents.list_dates())
                .await?
                .into_iter()
                .filter(|summary| summary.trading_date >= start && summary.trading_date <= end)
                .filter(|summary| summary.symbols.contains(symbol))
                .map(|summary| summary.trading_date)
                .collect()
        };

        let mut records = Vec::new();
        for trading_date in dates {
            records.extend(
                self.retry
                    .run(DOCUMENT_STORE, None, |_| {
                        self.documents.query_by_symbol(Some(symbol), trading_date)
                    })
                    .await?,
            );
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn day() -> TradingDate {
        TradingDate::from_date(date!(2023 - 08 - 22))
    }

    #[test]
    fn cache_keys_are_namespaced_by_kind() {
        let hti = Symbol::parse("HTI").expect("symbol");
        assert_eq!(
            SettlementQuery::ByDateAll { trading_date: day() }.cache_key(),
            "settlement:v1:date:2023-08-22:all"
        );
        assert_eq!(
            SettlementQuery::SymbolsForDate { trading_date: day() }.cache_key(),
            "settlement:v1:date:2023-08-22:symbols"
        );
        assert_eq!(
            SettlementQuery::symbol_on(hti, day()).cache_key(),
            "settlement:v1:range:HTI:2023-08-22:2023-08-22"
        );
        assert_eq!(SettlementQuery::ListDates.cache_key(), "settlement:v1:dates");
    }

    #[test]
    fn inverted_range_is_invalid() {
        let query = SettlementQuery::BySymbolAndDateRange {
            symbol: Symbol::parse("HTI").expect("symbol"),
            start: TradingDate::from_date(date!(2023 - 08 - 23)),
            end: day(),
        };
        assert!(matches!(query.check(), Err(QueryError::InvalidQuery(_))));
    }

    #[test]
    fn query_results_survive_the_cache_encoding() {
        let result = QueryResult::Symbols(vec![Symbol::parse("HTI").expect("symbol")]);
        let body = serde_json::to_string(&result).expect("encode");
        assert_eq!(body, r#"{"type":"symbols","items":["HTI"]}"#);
        assert_eq!(
            serde_json::from_str::<QueryResult>(&body).expect("decode"),
            result
        );
    }
}
