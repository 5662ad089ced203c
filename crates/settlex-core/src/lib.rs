//! # Settlex Core
//!
//! Ingestion and querying of HKEX daily settlement files.
//!
//! ## Overview
//!
//! A trading date's file flows through four stages:
//!
//! - **Fetcher** downloads `sp{ddmmyy}.dat` with bounded retries
//! - **Parser** turns bytes into candidates, collecting warnings instead of failing
//! - **Validator** applies business rules and partitions accepted from rejected
//! - **Store Coordinator** fans accepted records out to the cache and both durable stores
//!
//! Reads go through the same coordinator and are served cache-first.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | In-process TTL cache |
//! | [`config`] | Runtime configuration |
//! | [`coordinator`] | Write fan-out, cache-first queries, single-flight |
//! | [`domain`] | Records, summaries, trading dates, symbols |
//! | [`duckdb_store`] | DuckDB-backed durable stores |
//! | [`fetcher`] | Settlement file download |
//! | [`http_client`] | HTTP client abstraction |
//! | [`memory`] | In-memory stores with fault injection |
//! | [`parser`] | Settlement file parser |
//! | [`retry`] | Backoff and retry policy |
//! | [`service`] | End-to-end pipeline |
//! | [`store`] | Collaborator traits and `StoreError` |
//! | [`validator`] | Business-rule validation |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌───────────────────┐
//! │ Fetcher  │──▶│  Parser  │──▶│ Validator │──▶│ Store Coordinator │
//! └──────────┘   └──────────┘   └───────────┘   └─────────┬─────────┘
//!                                                         │
//!                              ┌──────────────────────────┼──────────────────┐
//!                              ▼                          ▼                  ▼
//!                        ┌──────────┐          ┌───────────────────┐ ┌────────────────┐
//!                        │  Cache   │          │ Time-Series Store │ │ Document Store │
//!                        └──────────┘          └───────────────────┘ └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use settlex_core::{IngestOptions, SettlementQuery, SettlementService, SettlexConfig, TradingDate};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SettlexConfig::from_env()?;
//!     let service = SettlementService::open(&config)?;
//!
//!     let date = TradingDate::parse("2023-08-22")?;
//!     let result = service.ingest(date, IngestOptions::default()).await?;
//!     println!("{} accepted, status {}", result.accepted_count, result.status.as_str());
//!
//!     let outcome = service.query(&SettlementQuery::ByDateAll { trading_date: date }).await?;
//!     println!("{} records", outcome.result.len());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod duckdb_store;
pub mod error;
pub mod fetcher;
pub mod http_client;
pub mod memory;
pub mod parser;
pub mod retry;
pub mod service;
pub mod store;
pub mod validator;

// Caching
pub use cache::CacheStore;

// Configuration
pub use config::{ConfigError, SettlexConfig};

// Coordination and queries
pub use coordinator::{
    CacheTtls, HealthReport, HealthState, IngestError, QueryError, QueryOutcome, QueryResult,
    QuerySource, SettlementQuery, SingleFlight, SingleFlightPolicy, StoreCoordinator,
};

// Domain models
pub use domain::{
    CallPut, IngestStatus, IngestionResult, RecordKey, SettlementCandidate, SettlementRecord,
    SummaryStatus, Symbol, TradingDate, TradingDateSummary, UtcDateTime, PRICE_SCALE,
};

// Durable stores
pub use duckdb_store::{DuckDbDocumentStore, DuckDbSeriesStore};
pub use memory::{FaultPlan, MemoryDocumentStore, MemorySeriesStore};
pub use store::{
    DocumentStore, SettlementCache, StoreError, StoreErrorKind, TimeSeriesStore, CACHE_STORE,
    DOCUMENT_STORE, SERIES_STORE,
};

// Error types
pub use error::{CoreError, ValidationError};

// Pipeline stages
pub use fetcher::{FetchError, Fetcher};
pub use http_client::{
    HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient, StaticHttpClient,
};
pub use parser::{ParseOutput, ParseWarning};
pub use retry::{Backoff, RetryPolicy, RetryableError};
pub use service::{IngestHandle, IngestOptions, SettlementService};
pub use validator::{RejectionReason, Validated};

// Warehouse (re-exported from settlex-warehouse)
pub use settlex_warehouse::{WarehouseConfig, WarehouseError};
