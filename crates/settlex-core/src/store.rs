//! Collaborator contracts for the cache and the two durable stores.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use uuid::Uuid;

use crate::domain::{SettlementRecord, Symbol, TradingDate, TradingDateSummary};
use crate::retry::RetryableError;

pub const CACHE_STORE: &str = "cache";
pub const SERIES_STORE: &str = "time_series";
pub const DOCUMENT_STORE: &str = "document";

/// Boxed future returned by collaborator calls.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Failure class of a collaborator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Worth retrying: lock contention, dropped connection, overload.
    Transient,
    /// The collaborator is down or refused the data.
    Unavailable,
    /// The call did not finish in time.
    Timeout,
}

/// Error raised by a cache or durable store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    kind: StoreErrorKind,
    store: String,
    message: String,
    retryable: bool,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, store: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            store: store.into(),
            message: message.into(),
            retryable: !matches!(kind, StoreErrorKind::Unavailable),
        }
    }

    pub fn transient(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Transient, store, message)
    }

    pub fn unavailable(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Unavailable, store, message)
    }

    /// A timeout that must not be retried, e.g. a caller deadline.
    pub fn deadline(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            ..Self::new(StoreErrorKind::Timeout, store, message)
        }
    }

    pub const fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            StoreErrorKind::Transient => "store_transient",
            StoreErrorKind::Unavailable => "store_unavailable",
            StoreErrorKind::Timeout => "store_timeout",
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} store error ({}): {}", self.store, self.code(), self.message)
    }
}

impl std::error::Error for StoreError {}

impl RetryableError for StoreError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }

    fn timed_out(operation: &str, after: Duration, deadline: bool) -> Self {
        let message = format!("timed out after {}ms", after.as_millis());
        if deadline {
            Self::deadline(operation, format!("deadline exceeded: {message}"))
        } else {
            Self::new(StoreErrorKind::Timeout, operation, message)
        }
    }
}

/// Key-value cache with per-entry TTL. Values are JSON strings.
pub trait SettlementCache: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    fn set<'a>(&'a self, key: String, value: String, ttl: Duration) -> StoreFuture<'a, ()>;

    /// Remove every entry whose key starts with `prefix`; returns how many.
    fn invalidate_prefix<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, usize>;

    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// Durable store keyed on trading date for range scans.
pub trait TimeSeriesStore: Send + Sync {
    /// Upsert records for one trading date; same identity overwrites.
    fn write_series<'a>(
        &'a self,
        run_id: Uuid,
        trading_date: TradingDate,
        records: &'a [SettlementRecord],
    ) -> StoreFuture<'a, usize>;

    /// Records with `start <= trading_date <= end`, optionally for one symbol.
    fn query_range<'a>(
        &'a self,
        symbol: Option<&'a Symbol>,
        start: TradingDate,
        end: TradingDate,
    ) -> StoreFuture<'a, Vec<SettlementRecord>>;

    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// Durable store of one document per record plus trading date summaries.
pub trait DocumentStore: Send + Sync {
    /// Upsert records for one trading date; same identity overwrites.
    fn upsert_documents<'a>(
        &'a self,
        run_id: Uuid,
        trading_date: TradingDate,
        records: &'a [SettlementRecord],
    ) -> StoreFuture<'a, usize>;

    /// Records of one trading date, optionally for one symbol.
    fn query_by_symbol<'a>(
        &'a self,
        symbol: Option<&'a Symbol>,
        trading_date: TradingDate,
    ) -> StoreFuture<'a, Vec<SettlementRecord>>;

    fn upsert_summary<'a>(&'a self, summary: &'a TradingDateSummary) -> StoreFuture<'a, ()>;

    /// Every summary, most recent trading date first.
    fn list_dates(&self) -> StoreFuture<'_, Vec<TradingDateSummary>>;

    fn ping(&self) -> StoreFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_is_not_retryable() {
        assert!(StoreError::transient(SERIES_STORE, "busy").retryable());
        assert!(!StoreError::unavailable(SERIES_STORE, "down").retryable());
    }

    #[test]
    fn deadline_timeouts_are_final() {
        let per_attempt = StoreError::timed_out(DOCUMENT_STORE, Duration::from_millis(5), false);
        let deadline = StoreError::timed_out(DOCUMENT_STORE, Duration::from_millis(5), true);

        assert_eq!(per_attempt.kind(), StoreErrorKind::Timeout);
        assert!(per_attempt.retryable());
        assert_eq!(deadline.kind(), StoreErrorKind::Timeout);
        assert!(!deadline.retryable());
        assert_eq!(deadline.store(), DOCUMENT_STORE);
    }
}
