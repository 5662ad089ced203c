//! End-to-end wiring: Fetcher → Parser → Validator → Store Coordinator.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::config::SettlexConfig;
use crate::coordinator::{
    CacheTtls, HealthReport, IngestError, QueryError, QueryOutcome, QueryResult,
    SettlementQuery, SingleFlightPolicy, StoreCoordinator,
};
use crate::domain::{IngestionResult, TradingDate};
use crate::duckdb_store::{DuckDbDocumentStore, DuckDbSeriesStore};
use crate::error::CoreError;
use crate::fetcher::{FetchError, Fetcher};
use crate::http_client::ReqwestHttpClient;
use crate::parser::{self, ParseOutput};
use crate::retry::RetryPolicy;
use crate::validator;

/// Per-call ingestion options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Overall budget for fetch plus writes, measured from the call.
    pub deadline: Option<Duration>,
}

impl IngestOptions {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }
}

/// The ingestion and query entry point.
pub struct SettlementService {
    fetcher: Fetcher,
    coordinator: Arc<StoreCoordinator>,
    policy: SingleFlightPolicy,
}

impl SettlementService {
    /// Wire the production collaborators described by `config`.
    pub fn open(config: &SettlexConfig) -> Result<Self, CoreError> {
        let warehouse = config.warehouse();
        let series = DuckDbSeriesStore::open(&warehouse.series_db_path, warehouse.max_pool_size)?;
        let documents =
            DuckDbDocumentStore::open(&warehouse.documents_db_path, warehouse.max_pool_size)?;
        let coordinator = StoreCoordinator::new(
            Arc::new(CacheStore::new(config.query_ttl)),
            Arc::new(series),
            Arc::new(documents),
        )
        .with_retry(RetryPolicy::exponential(
            config.store_attempts,
            config.store_timeout,
        ))
        .with_ttls(CacheTtls {
            query: config.query_ttl,
            dates: config.dates_ttl,
        });

        let mut fetcher = Fetcher::new(
            Arc::new(ReqwestHttpClient::new()),
            config.base_url.clone(),
            RetryPolicy::exponential(config.fetch_attempts, config.fetch_timeout),
        );
        if let Some(dir) = &config.data_dir {
            fetcher = fetcher.with_archive_dir(dir.clone());
        }

        info!(home = %config.home.display(), "settlement service opened");
        Ok(Self::from_parts(fetcher, coordinator, config.single_flight))
    }

    pub fn from_parts(
        fetcher: Fetcher,
        coordinator: StoreCoordinator,
        policy: SingleFlightPolicy,
    ) -> Self {
        Self {
            fetcher,
            coordinator: Arc::new(coordinator),
            policy,
        }
    }

    pub fn coordinator(&self) -> &StoreCoordinator {
        &self.coordinator
    }

    /// Fetch, parse, validate and store the file for `trading_date`.
    ///
    /// A file that fails the signature check is ingested as an empty
    /// result with one structural warning. Other fetch failures are errors.
    pub async fn ingest(
        &self,
        trading_date: TradingDate,
        options: IngestOptions,
    ) -> Result<IngestionResult, IngestError> {
        let deadline = options.deadline.map(|budget| Instant::now() + budget);
        self.coordinator
            .flights()
            .run(trading_date, self.policy, async {
                let parsed = match self.fetcher.fetch(trading_date, deadline).await {
                    Ok(body) => parser::parse(&body, trading_date),
                    Err(FetchError::Malformed { reason }) => {
                        warn!(%trading_date, %reason, "downloaded file is not a settlement file");
                        ParseOutput::structural(reason)
                    }
                    Err(error) => {
                        warn!(%trading_date, code = error.code(), %error, "fetch failed");
                        return Err(IngestError::Fetch(error));
                    }
                };
                Ok(self.store_parsed(trading_date, parsed, deadline).await)
            })
            .await
    }

    /// Ingest a file already in hand, bypassing the fetcher.
    pub async fn ingest_bytes(
        &self,
        trading_date: TradingDate,
        raw: &[u8],
        options: IngestOptions,
    ) -> Result<IngestionResult, IngestError> {
        let deadline = options.deadline.map(|budget| Instant::now() + budget);
        self.coordinator
            .flights()
            .run(trading_date, self.policy, async {
                let parsed = parser::parse(raw, trading_date);
                Ok(self.store_parsed(trading_date, parsed, deadline).await)
            })
            .await
    }

    /// Run [`SettlementService::ingest`] on its own task.
    pub fn spawn_ingest(
        self: &Arc<Self>,
        trading_date: TradingDate,
        options: IngestOptions,
    ) -> IngestHandle {
        let service = Arc::clone(self);
        IngestHandle {
            inner: tokio::spawn(async move { service.ingest(trading_date, options).await }),
        }
    }

    pub async fn query(&self, query: &SettlementQuery) -> Result<QueryOutcome, QueryError> {
        self.coordinator.query(query).await
    }

    pub async fn health(&self) -> HealthReport {
        self.coordinator.health().await
    }

    /// Most recent ingested trading date, if any.
    pub async fn latest_trading_date(&self) -> Result<Option<TradingDate>, QueryError> {
        let outcome = self.query(&SettlementQuery::ListDates).await?;
        Ok(match outcome.result {
            QueryResult::Dates(dates) => dates.iter().map(|summary| summary.trading_date).max(),
            _ => None,
        })
    }

    async fn store_parsed(
        &self,
        trading_date: TradingDate,
        parsed: ParseOutput,
        deadline: Option<Instant>,
    ) -> IngestionResult {
        let ParseOutput {
            candidates,
            warnings,
        } = parsed;
        if !warnings.is_empty() {
            warn!(%trading_date, warnings = warnings.len(), "parser skipped lines");
        }

        let validated = validator::validate(candidates);
        let rejected_reasons = validated.rejected_reasons();
        let rejected_count = validated.rejected.len();

        let mut result = self
            .coordinator
            .ingest(trading_date, validated.accepted, deadline)
            .await;
        result.rejected_count = rejected_count;
        result.rejected_reasons = rejected_reasons;
        result.warnings = warnings;
        result
    }
}

/// A spawned ingestion; await it for the result.
#[derive(Debug)]
pub struct IngestHandle {
    inner: JoinHandle<Result<IngestionResult, IngestError>>,
}

impl IngestHandle {
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    pub fn abort(&self) {
        self.inner.abort();
    }
}

impl Future for IngestHandle {
    type Output = Result<IngestionResult, IngestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(|joined| match joined {
            Ok(outcome) => outcome,
            Err(error) => Err(IngestError::Task(error.to_string())),
        })
    }
}
