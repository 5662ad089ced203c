//! Store Coordinator: the single write path into the cache and both durable
//! stores, and the cache-first read path out of them.
//!
//! # Write policy
//!
//! Accepted records fan out to all three collaborators concurrently, each
//! through its own retry loop. Both durable stores must accept the write for
//! a `complete` ingestion; the cache is advisory. When exactly one durable
//! store fails the run is `partial` and the other store keeps its rows; no
//! rollback or later reconciliation is attempted.
//!
//! # Cache keys
//!
//! | Query | Key |
//! |-------|-----|
//! | `ByDateAll(d)` | `settlement:v1:date:{d}:all` |
//! | `SymbolsForDate(d)` | `settlement:v1:date:{d}:symbols` |
//! | `BySymbolAndDateRange(s, a, b)` | `settlement:v1:range:{s}:{a}:{b}` |
//! | `ListDates` | `settlement:v1:dates` |
//!
//! # Freshness
//!
//! The date's keys are dropped before the durable writes start and again once
//! they have finished; only then is the new day pre-populated. Every
//! post-write invalidation advances the ingestion generation, and a read-through
//! fill whose durable read began under an older generation is discarded, so a
//! read that raced the writes cannot cache the prior state.

mod query;
mod single_flight;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{
    IngestStatus, IngestionResult, RecordKey, SettlementRecord, SummaryStatus, TradingDate,
    TradingDateSummary, UtcDateTime,
};
use crate::fetcher::FetchError;
use crate::retry::RetryPolicy;
use crate::store::{
    DocumentStore, SettlementCache, StoreError, TimeSeriesStore, CACHE_STORE, DOCUMENT_STORE,
    SERIES_STORE,
};

pub use query::{
    date_prefix, QueryError, QueryOutcome, QueryResult, QuerySource, SettlementQuery, DATES_KEY,
    RANGE_PREFIX,
};
pub use single_flight::{SingleFlight, SingleFlightPolicy};

use query::{merge_records, symbols_of};

/// Why an ingestion produced no [`IngestionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("an ingestion for {trading_date} is already in progress")]
    ConcurrentIngestionInProgress { trading_date: TradingDate },

    #[error("ingestion task failed: {0}")]
    Task(String),
}

/// Time-to-live of cached query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    /// Record and symbol queries.
    pub query: Duration,
    /// The trading date listing.
    pub dates: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            query: Duration::from_secs(30 * 60),
            dates: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Up,
    Down,
}

/// Reachability of every collaborator, keyed by collaborator name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub collaborators: BTreeMap<String, HealthState>,
}

impl HealthReport {
    pub fn all_up(&self) -> bool {
        self.collaborators
            .values()
            .all(|state| *state == HealthState::Up)
    }

    pub fn state(&self, collaborator: &str) -> Option<HealthState> {
        self.collaborators.get(collaborator).copied()
    }
}

/// Coordinates writes and reads across the cache and the durable stores.
pub struct StoreCoordinator {
    cache: Arc<dyn SettlementCache>,
    series: Arc<dyn TimeSeriesStore>,
    documents: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    ttls: CacheTtls,
    flights: SingleFlight,
    /// Bumped under the write lock whenever durable state changed; fills hold
    /// the read lock while they compare and write.
    generation: RwLock<u64>,
}

impl StoreCoordinator {
    pub fn new(
        cache: Arc<dyn SettlementCache>,
        series: Arc<dyn TimeSeriesStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            cache,
            series,
            documents,
            retry: RetryPolicy::exponential(3, Duration::from_secs(5)),
            ttls: CacheTtls::default(),
            flights: SingleFlight::new(),
            generation: RwLock::new(0),
        }
    }

    /// Retry policy applied to every collaborator call.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ttls(mut self, ttls: CacheTtls) -> Self {
        self.ttls = ttls;
        self
    }

    /// Per-date single-flight registry.
    pub fn flights(&self) -> &SingleFlight {
        &self.flights
    }

    /// Write `accepted` for `trading_date` to every collaborator.
    ///
    /// Never fails: store failures are reported through the result's
    /// `status` and `failed_stores`. Parser and validator diagnostics are
    /// left empty for the caller to fill in.
    pub async fn ingest(
        &self,
        trading_date: TradingDate,
        accepted: Vec<SettlementRecord>,
        deadline: Option<Instant>,
    ) -> IngestionResult {
        let run_id = Uuid::new_v4();
        let accepted_count = accepted.len();
        let records = dedupe(accepted);
        let mut result = IngestionResult {
            run_id,
            trading_date,
            status: IngestStatus::Empty,
            accepted_count,
            duplicate_count: accepted_count - records.len(),
            rejected_count: 0,
            rejected_reasons: BTreeMap::new(),
            warnings: Vec::new(),
            failed_stores: Vec::new(),
            cache_written: false,
            net_new_records: 0,
            completed_at: UtcDateTime::now(),
        };
        if records.is_empty() {
            info!(%trading_date, %run_id, "no accepted records, nothing written");
            return result;
        }

        let prior = self.prior_records(trading_date, deadline).await;
        let prior_keys: HashSet<RecordKey> = prior
            .iter()
            .flatten()
            .map(SettlementRecord::key)
            .collect();
        let new_records = records
            .iter()
            .filter(|record| !prior_keys.contains(&record.key()))
            .count();
        result.net_new_records = u64::try_from(new_records).unwrap_or(u64::MAX);

        // Accepted rows overwrite prior rows with the same identity.
        let day_records = prior
            .map(|prior| merge_records([records.clone(), prior]));

        let (invalidated, series_outcome, document_outcome) = tokio::join!(
            self.retry
                .run(CACHE_STORE, deadline, |_| self.invalidate_date(trading_date)),
            self.retry.run(SERIES_STORE, deadline, |_| {
                self.series.write_series(run_id, trading_date, &records)
            }),
            self.retry.run(DOCUMENT_STORE, deadline, |_| {
                self.documents.upsert_documents(run_id, trading_date, &records)
            }),
        );
        result.completed_at = UtcDateTime::now();

        for (store, outcome) in [
            (SERIES_STORE, series_outcome),
            (DOCUMENT_STORE, document_outcome),
        ] {
            if let Err(error) = outcome {
                error!(%trading_date, %run_id, store, %error, "durable write failed");
                result.failed_stores.push(store.to_owned());
            }
        }
        result.status = match result.failed_stores.len() {
            0 => IngestStatus::Complete,
            1 => IngestStatus::Partial,
            _ => IngestStatus::Failed,
        };

        if let Err(error) = invalidated {
            warn!(%trading_date, %run_id, %error, "pre-write cache invalidation failed");
        }
        // Reads that raced the writes may have cached the prior state.
        let retired = self.retire(&date_scoped_prefixes(trading_date)).await;

        if result.status == IngestStatus::Failed {
            // Nothing durable backs this run, so nothing of it may be served.
            if let Err(error) = retired {
                warn!(%trading_date, %run_id, %error, "cache invalidation failed");
            }
        } else {
            match (retired, day_records.as_deref()) {
                (Ok(()), Some(day)) => match self.populate(trading_date, day, deadline).await {
                    Ok(()) => result.cache_written = true,
                    Err(error) => warn!(%trading_date, %run_id, %error, "cache refresh failed"),
                },
                (Ok(()), None) => {}
                (Err(error), _) => warn!(
                    %trading_date,
                    %run_id,
                    %error,
                    "cache invalidation failed, skipping pre-population"
                ),
            }
            let records_for_summary = day_records.as_deref().unwrap_or(&records);
            self.write_summary(&result, records_for_summary, deadline)
                .await;
        }

        info!(
            %trading_date,
            %run_id,
            status = result.status.as_str(),
            accepted = result.accepted_count,
            duplicates = result.duplicate_count,
            net_new = result.net_new_records,
            cache_written = result.cache_written,
            "ingestion finished"
        );
        result
    }

    /// Ping every collaborator concurrently, each bounded by the attempt timeout.
    pub async fn health(&self) -> HealthReport {
        let timeout = self.retry.attempt_timeout;
        let (cache, series, documents) = tokio::join!(
            probe(CACHE_STORE, timeout, self.cache.ping()),
            probe(SERIES_STORE, timeout, self.series.ping()),
            probe(DOCUMENT_STORE, timeout, self.documents.ping()),
        );

        HealthReport {
            collaborators: [
                (CACHE_STORE.to_owned(), cache),
                (SERIES_STORE.to_owned(), series),
                (DOCUMENT_STORE.to_owned(), documents),
            ]
            .into_iter()
            .collect(),
        }
    }

    /// Existing rows for the date, from the document store or else the series store.
    async fn prior_records(
        &self,
        trading_date: TradingDate,
        deadline: Option<Instant>,
    ) -> Option<Vec<SettlementRecord>> {
        match self
            .retry
            .run(DOCUMENT_STORE, deadline, |_| {
                self.documents.query_by_symbol(None, trading_date)
            })
            .await
        {
            Ok(records) => return Some(records),
            Err(error) => {
                warn!(%trading_date, %error, "prior-state read failed, trying series store");
            }
        }

        match self
            .retry
            .run(SERIES_STORE, deadline, |_| {
                self.series.query_range(None, trading_date, trading_date)
            })
            .await
        {
            Ok(records) => Some(records),
            Err(error) => {
                warn!(%trading_date, %error, "prior state unknown, cache will only be invalidated");
                None
            }
        }
    }

    async fn invalidate_date(&self, trading_date: TradingDate) -> Result<(), StoreError> {
        for prefix in date_scoped_prefixes(trading_date) {
            self.cache.invalidate_prefix(&prefix).await?;
        }
        Ok(())
    }

    /// Start a new generation and drop every key under `prefixes`.
    async fn retire(&self, prefixes: &[String]) -> Result<(), StoreError> {
        let mut generation = self.generation.write().await;
        *generation += 1;
        for prefix in prefixes {
            self.retry
                .run(CACHE_STORE, None, |_| self.cache.invalidate_prefix(prefix))
                .await?;
        }
        Ok(())
    }

    pub(super) async fn current_generation(&self) -> u64 {
        *self.generation.read().await
    }

    /// Cache `result` under `key` unless durable state changed after
    /// `generation` was observed.
    pub(super) async fn fill(
        &self,
        key: String,
        result: &QueryResult,
        ttl: Duration,
        generation: u64,
    ) {
        let body = match serde_json::to_string(result) {
            Ok(body) => body,
            Err(error) => {
                warn!(%key, %error, "could not encode query result for cache");
                return;
            }
        };
        let current = self.generation.read().await;
        if *current != generation {
            debug!(%key, "durable state changed during the read, not caching");
            return;
        }
        if let Err(error) = self.cache.set(key.clone(), body, ttl).await {
            warn!(%key, %error, "cache fill failed");
        }
    }

    /// Pre-populate the date's keys from the full day.
    async fn populate(
        &self,
        trading_date: TradingDate,
        day_records: &[SettlementRecord],
        deadline: Option<Instant>,
    ) -> Result<(), StoreError> {
        let symbols = symbols_of(day_records);
        let mut entries = vec![
            (
                SettlementQuery::ByDateAll { trading_date },
                QueryResult::Records(day_records.to_vec()),
            ),
            (
                SettlementQuery::SymbolsForDate { trading_date },
                QueryResult::Symbols(symbols.iter().cloned().collect()),
            ),
        ];
        for symbol in symbols {
            let matching = day_records
                .iter()
                .filter(|record| record.symbol().as_ref() == Some(&symbol))
                .cloned()
                .collect();
            entries.push((
                SettlementQuery::symbol_on(symbol, trading_date),
                QueryResult::Records(matching),
            ));
        }

        for (query, result) in entries {
            let body = serde_json::to_string(&result)
                .map_err(|error| StoreError::unavailable(CACHE_STORE, error.to_string()))?;
            let key = query.cache_key();
            self.retry
                .run(CACHE_STORE, deadline, |_| {
                    self.cache.set(key.clone(), body.clone(), self.ttls.query)
                })
                .await?;
        }
        Ok(())
    }

    async fn write_summary(
        &self,
        result: &IngestionResult,
        day_records: &[SettlementRecord],
        deadline: Option<Instant>,
    ) {
        let summary = TradingDateSummary {
            trading_date: result.trading_date,
            record_count: u64::try_from(day_records.len()).unwrap_or(u64::MAX),
            symbols: symbols_of(day_records),
            ingested_at: result.completed_at,
            status: if result.status == IngestStatus::Complete {
                SummaryStatus::Complete
            } else {
                SummaryStatus::Partial
            },
        };

        let trading_date = result.trading_date;
        let run_id = result.run_id;
        if let Err(error) = self
            .retry
            .run(DOCUMENT_STORE, deadline, |_| {
                self.documents.upsert_summary(&summary)
            })
            .await
        {
            error!(%trading_date, %run_id, %error, "trading date summary write failed");
        }
        // A listing cached while the summary was in flight would miss this date.
        if let Err(error) = self.retire(&[DATES_KEY.to_owned()]).await {
            warn!(%trading_date, %run_id, %error, "date listing invalidation failed");
        }
    }
}

fn date_scoped_prefixes(trading_date: TradingDate) -> [String; 3] {
    [
        date_prefix(trading_date),
        RANGE_PREFIX.to_owned(),
        DATES_KEY.to_owned(),
    ]
}

/// Keep one record per identity: last occurrence wins, first position kept.
fn dedupe(records: Vec<SettlementRecord>) -> Vec<SettlementRecord> {
    let mut positions: BTreeMap<RecordKey, usize> = BTreeMap::new();
    let mut unique: Vec<SettlementRecord> = Vec::with_capacity(records.len());
    for record in records {
        let record = record.normalized();
        match positions.get(&record.key()) {
            Some(&index) => unique[index] = record,
            None => {
                positions.insert(record.key(), unique.len());
                unique.push(record);
            }
        }
    }
    unique
}

async fn probe(
    name: &str,
    timeout: Duration,
    ping: impl std::future::Future<Output = Result<(), StoreError>>,
) -> HealthState {
    match tokio::time::timeout(timeout, ping).await {
        Ok(Ok(())) => HealthState::Up,
        Ok(Err(error)) => {
            warn!(collaborator = name, %error, "health check failed");
            HealthState::Down
        }
        Err(_) => {
            warn!(collaborator = name, "health check timed out");
            HealthState::Down
        }
    }
}
