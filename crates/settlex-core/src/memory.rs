//! In-memory durable stores with scripted faults, for tests and demos.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use uuid::Uuid;

use crate::domain::{RecordKey, SettlementRecord, Symbol, TradingDate, TradingDateSummary};
use crate::store::{
    DocumentStore, StoreError, StoreErrorKind, StoreFuture, TimeSeriesStore, DOCUMENT_STORE,
    SERIES_STORE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Healthy,
    FailNext { remaining: u32, kind: StoreErrorKind },
    Down(StoreErrorKind),
}

#[derive(Debug)]
struct FaultState {
    fault: Fault,
    latency: Option<Duration>,
}

/// Shared switchboard deciding whether the next call to a store fails.
#[derive(Debug, Clone)]
pub struct FaultPlan {
    inner: Arc<Mutex<FaultState>>,
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FaultState {
                fault: Fault::Healthy,
                latency: None,
            })),
        }
    }
}

impl FaultPlan {
    /// Fail the next `count` calls with `kind`, then recover.
    pub fn fail_next(&self, count: u32, kind: StoreErrorKind) {
        self.lock().fault = Fault::FailNext {
            remaining: count,
            kind,
        };
    }

    /// Fail every call with `kind` until [`FaultPlan::recover`].
    pub fn go_down(&self, kind: StoreErrorKind) {
        self.lock().fault = Fault::Down(kind);
    }

    pub fn recover(&self) {
        self.lock().fault = Fault::Healthy;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    fn lock(&self) -> MutexGuard<'_, FaultState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consume one scheduled fault, if any.
    fn next(&self, store: &str) -> (Option<StoreError>, Option<Duration>) {
        let mut state = self.lock();
        let latency = state.latency;
        let kind = match state.fault {
            Fault::Healthy => None,
            Fault::Down(kind) => Some(kind),
            Fault::FailNext { remaining, kind } => {
                state.fault = if remaining <= 1 {
                    Fault::Healthy
                } else {
                    Fault::FailNext {
                        remaining: remaining - 1,
                        kind,
                    }
                };
                Some(kind)
            }
        };
        let error = kind.map(|kind| StoreError::new(kind, store, "injected fault"));
        (error, latency)
    }

    async fn gate(&self, store: &str) -> Result<(), StoreError> {
        let (error, latency) = self.next(store);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        error.map_or(Ok(()), Err)
    }
}

#[derive(Debug, Default)]
struct Table {
    records: BTreeMap<RecordKey, SettlementRecord>,
    writes: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn upsert(table: &Mutex<Table>, records: &[SettlementRecord]) -> usize {
    let mut table = lock(table);
    table.writes += 1;
    for record in records {
        let record = record.clone().normalized();
        table.records.insert(record.key(), record);
    }
    records.len()
}

fn matches_symbol(record: &SettlementRecord, symbol: Option<&Symbol>) -> bool {
    symbol.map_or(true, |symbol| record.symbol().as_ref() == Some(symbol))
}

/// Time-series store held in a `BTreeMap`.
#[derive(Debug, Clone, Default)]
pub struct MemorySeriesStore {
    table: Arc<Mutex<Table>>,
    faults: FaultPlan,
}

impl MemorySeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Number of successful `write_series` calls.
    pub fn write_calls(&self) -> usize {
        lock(&self.table).writes
    }

    pub fn len(&self) -> usize {
        lock(&self.table).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored record in identity order.
    pub fn snapshot(&self) -> Vec<SettlementRecord> {
        lock(&self.table).records.values().cloned().collect()
    }
}

impl TimeSeriesStore for MemorySeriesStore {
    fn write_series<'a>(
        &'a self,
        _run_id: Uuid,
        _trading_date: TradingDate,
        records: &'a [SettlementRecord],
    ) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            self.faults.gate(SERIES_STORE).await?;
            Ok(upsert(&self.table, records))
        })
    }

    fn query_range<'a>(
        &'a self,
        symbol: Option<&'a Symbol>,
        start: TradingDate,
        end: TradingDate,
    ) -> StoreFuture<'a, Vec<SettlementRecord>> {
        Box::pin(async move {
            self.faults.gate(SERIES_STORE).await?;
            Ok(lock(&self.table)
                .records
                .values()
                .filter(|record| record.trading_date >= start && record.trading_date <= end)
                .filter(|record| matches_symbol(record, symbol))
                .cloned()
                .collect())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.faults.gate(SERIES_STORE).await })
    }
}

/// Document store held in memory, with summaries keyed by trading date.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    table: Arc<Mutex<Table>>,
    summaries: Arc<Mutex<HashMap<TradingDate, TradingDateSummary>>>,
    faults: FaultPlan,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Number of successful `upsert_documents` calls.
    pub fn write_calls(&self) -> usize {
        lock(&self.table).writes
    }

    pub fn len(&self) -> usize {
        lock(&self.table).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored record in identity order.
    pub fn snapshot(&self) -> Vec<SettlementRecord> {
        lock(&self.table).records.values().cloned().collect()
    }

    pub fn summary(&self, trading_date: TradingDate) -> Option<TradingDateSummary> {
        lock(&self.summaries).get(&trading_date).cloned()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn upsert_documents<'a>(
        &'a self,
        _run_id: Uuid,
        _trading_date: TradingDate,
        records: &'a [SettlementRecord],
    ) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            self.faults.gate(DOCUMENT_STORE).await?;
            Ok(upsert(&self.table, records))
        })
    }

    fn query_by_symbol<'a>(
        &'a self,
        symbol: Option<&'a Symbol>,
        trading_date: TradingDate,
    ) -> StoreFuture<'a, Vec<SettlementRecord>> {
        Box::pin(async move {
            self.faults.gate(DOCUMENT_STORE).await?;
            Ok(lock(&self.table)
                .records
                .values()
                .filter(|record| record.trading_date == trading_date)
                .filter(|record| matches_symbol(record, symbol))
                .cloned()
                .collect())
        })
    }

    fn upsert_summary<'a>(&'a self, summary: &'a TradingDateSummary) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.faults.gate(DOCUMENT_STORE).await?;
            lock(&self.summaries).insert(summary.trading_date, summary.clone());
            Ok(())
        })
    }

    fn list_dates(&self) -> StoreFuture<'_, Vec<TradingDateSummary>> {
        Box::pin(async move {
            self.faults.gate(DOCUMENT_STORE).await?;
            let mut summaries: Vec<TradingDateSummary> =
                lock(&self.summaries).values().cloned().collect();
            summaries.sort_by(|a, b| b.trading_date.cmp(&a.trading_date));
            Ok(summaries)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.faults.gate(DOCUMENT_STORE).await })
    }
}
