//! Behavior-driven tests for cache-first queries
//!
//! These tests verify what a caller sees when reading settlement data:
//! where results come from, how stale entries are dropped, and how store
//! outages surface.

use std::sync::Arc;
use std::time::Duration;

use settlex_core::store::StoreFuture;
use settlex_core::{
    CacheStore, HealthState, IngestOptions, IngestStatus, MemoryDocumentStore, MemorySeriesStore,
    QueryError, QueryResult, QuerySource, RetryPolicy, SettlementCache, SettlementQuery,
    StoreCoordinator, StoreError, StoreErrorKind, Symbol, CACHE_STORE, DOCUMENT_STORE,
    SERIES_STORE,
};
use settlex_tests::{date, hti_day, single_row_file, Harness, HTI_FILE};

const TWO_SYMBOL_FILE: &str = "\
Series,Expiry,Strike,CallPut,Settlement,Volume,OpenInterest
HTI2308,2023-08-30,3800,C,120.50,100,50
HSI2308,2023-08-30,18000,C,410.00,30,20
HTI2308,2023-08-30,3800,P,60.75,80,40
HSI2308,2023-08-30,18000,P,390.00,45,25
";

fn symbol(value: &str) -> Symbol {
    Symbol::parse(value).expect("symbol")
}

async fn ingest(h: &Harness, day: &str, body: &str) {
    let result = h
        .service
        .ingest_bytes(date(day), body.as_bytes(), IngestOptions::default())
        .await
        .expect("ingest");
    assert_eq!(result.status, IngestStatus::Complete);
}

/// A cache whose every call fails.
struct BrokenCache;

impl SettlementCache for BrokenCache {
    fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async { Err(StoreError::unavailable(CACHE_STORE, "connection refused")) })
    }

    fn set<'a>(&'a self, _key: String, _value: String, _ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async { Err(StoreError::unavailable(CACHE_STORE, "connection refused")) })
    }

    fn invalidate_prefix<'a>(&'a self, _prefix: &'a str) -> StoreFuture<'a, usize> {
        Box::pin(async { Err(StoreError::unavailable(CACHE_STORE, "connection refused")) })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Err(StoreError::unavailable(CACHE_STORE, "connection refused")) })
    }
}

// =============================================================================
// Queries: Cache Correctness
// =============================================================================

#[tokio::test]
async fn when_date_was_just_ingested_then_symbol_search_is_served_from_cache() {
    // Given: a date with two symbols was just ingested
    let h = Harness::new();
    ingest(&h, "2023-08-22", TWO_SYMBOL_FILE).await;

    // When: each symbol is searched for that date
    for (name, expected_volume) in [("HTI", 180), ("HSI", 75)] {
        let outcome = h
            .service
            .query(&SettlementQuery::symbol_on(symbol(name), hti_day()))
            .await
            .expect("query");

        // Then: the answer comes from cache and holds exactly that symbol's records
        assert_eq!(outcome.source, QuerySource::Cache, "{name}");
        let records = outcome.result.records().expect("records");
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.series.starts_with(name)));
        assert_eq!(records.iter().map(|r| r.volume).sum::<u64>(), expected_volume);
    }
}

#[tokio::test]
async fn when_unknown_symbol_is_searched_then_result_is_empty_not_an_error() {
    // Given
    let h = Harness::new();
    h.publish(hti_day(), HTI_FILE);
    h.service
        .ingest(hti_day(), IngestOptions::default())
        .await
        .expect("ingest");

    // When
    let outcome = h
        .service
        .query(&SettlementQuery::symbol_on(symbol("INVALID"), hti_day()))
        .await
        .expect("empty search is a success");

    // Then
    assert!(outcome.result.is_empty());
    assert_eq!(outcome.result, QueryResult::Records(Vec::new()));
}

#[tokio::test]
async fn when_cache_is_cold_then_first_read_is_durable_and_second_is_cached() {
    // Given: data in the stores but nothing in the cache
    let h = Harness::new();
    ingest(&h, "2023-08-22", HTI_FILE).await;
    h.cache.invalidate_prefix("settlement:").await;
    let query = SettlementQuery::ByDateAll {
        trading_date: hti_day(),
    };

    // When
    let first = h.service.query(&query).await.expect("first");
    let second = h.service.query(&query).await.expect("second");

    // Then
    assert_eq!(first.source, QuerySource::Durable);
    assert_eq!(second.source, QuerySource::Cache);
    assert_eq!(first.result, second.result);
    assert_eq!(first.result.len(), 4);
}

#[tokio::test]
async fn when_a_new_date_is_ingested_then_cached_ranges_and_listings_are_refreshed() {
    // Given: a cached two-day range and date listing with only the first day
    let h = Harness::new();
    ingest(&h, "2023-08-21", &single_row_file("HTI2308", 3800)).await;
    let range = SettlementQuery::BySymbolAndDateRange {
        symbol: symbol("HTI"),
        start: date("2023-08-21"),
        end: date("2023-08-22"),
    };
    assert_eq!(h.service.query(&range).await.expect("range").result.len(), 1);
    assert_eq!(
        h.service
            .query(&SettlementQuery::ListDates)
            .await
            .expect("dates")
            .result
            .len(),
        1
    );

    // When: the second day is ingested
    ingest(&h, "2023-08-22", &single_row_file("HTI2308", 3900)).await;

    // Then: neither stale entry survives
    let refreshed = h.service.query(&range).await.expect("range");
    assert_eq!(refreshed.source, QuerySource::Durable);
    assert_eq!(refreshed.result.len(), 2);
    let dates = h
        .service
        .query(&SettlementQuery::ListDates)
        .await
        .expect("dates");
    assert_eq!(dates.result.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn when_a_range_is_read_while_its_dates_are_written_then_the_prior_state_is_not_kept() {
    // Given: one HTI record on the 21st and durable stores that take 200 ms per call
    let h = Harness::new();
    ingest(&h, "2023-08-21", &single_row_file("HTI2309", 3800)).await;
    h.publish(hti_day(), HTI_FILE);
    h.series.faults().set_latency(Duration::from_millis(200));
    h.documents.faults().set_latency(Duration::from_millis(200));
    let range = SettlementQuery::BySymbolAndDateRange {
        symbol: symbol("HTI"),
        start: date("2023-08-21"),
        end: hti_day(),
    };

    // When: the range misses the cache before the 22nd's rows land
    let running = h.service.spawn_ingest(hti_day(), IngestOptions::default());
    tokio::time::sleep(Duration::from_millis(100)).await;
    let during = h.service.query(&range).await.expect("during");
    let result = running.await.expect("ingest");
    let after = h.service.query(&range).await.expect("after");
    let again = h.service.query(&range).await.expect("again");

    // Then: the racing read saw one row and was not cached; later reads see all five
    assert_eq!(during.result.len(), 1);
    assert_eq!(result.status, IngestStatus::Complete);
    assert_eq!(after.source, QuerySource::Durable);
    assert_eq!(after.result.len(), 5);
    assert_eq!(again.source, QuerySource::Cache);
    assert_eq!(again.result.len(), 5);
}

#[tokio::test]
async fn when_dates_are_listed_then_they_are_strictly_descending() {
    // Given: dates ingested out of order
    let h = Harness::new();
    for day in ["2023-08-21", "2023-08-24", "2023-08-22", "2023-08-23"] {
        ingest(&h, day, &single_row_file("HTI2309", 3800)).await;
    }

    // When
    let outcome = h
        .service
        .query(&SettlementQuery::ListDates)
        .await
        .expect("dates");

    // Then
    let QueryResult::Dates(summaries) = outcome.result else {
        panic!("expected dates");
    };
    let days: Vec<String> = summaries
        .iter()
        .map(|s| s.trading_date.to_string())
        .collect();
    assert_eq!(
        days,
        vec!["2023-08-24", "2023-08-23", "2023-08-22", "2023-08-21"]
    );
    assert!(summaries
        .windows(2)
        .all(|pair| pair[0].trading_date > pair[1].trading_date));
}

#[tokio::test]
async fn when_symbols_for_a_date_are_listed_then_each_appears_once_in_order() {
    // Given
    let h = Harness::new();
    ingest(&h, "2023-08-22", TWO_SYMBOL_FILE).await;

    // When
    let outcome = h
        .service
        .query(&SettlementQuery::SymbolsForDate {
            trading_date: hti_day(),
        })
        .await
        .expect("symbols");

    // Then
    assert_eq!(
        outcome.result,
        QueryResult::Symbols(vec![symbol("HSI"), symbol("HTI")])
    );
}

#[tokio::test]
async fn when_range_is_inverted_then_query_is_rejected() {
    // Given
    let h = Harness::new();

    // When
    let error = h
        .service
        .query(&SettlementQuery::BySymbolAndDateRange {
            symbol: symbol("HTI"),
            start: date("2023-08-23"),
            end: date("2023-08-22"),
        })
        .await
        .expect_err("inverted range");

    // Then
    assert!(matches!(error, QueryError::InvalidQuery(_)));
}

// =============================================================================
// Queries: Store Outages
// =============================================================================

#[tokio::test]
async fn when_one_store_is_down_then_range_reads_degrade_and_are_not_cached() {
    // Given: data ingested, cache cleared, document store then lost
    let h = Harness::new();
    ingest(&h, "2023-08-22", HTI_FILE).await;
    h.cache.invalidate_prefix("settlement:").await;
    h.documents.faults().go_down(StoreErrorKind::Unavailable);
    let query = SettlementQuery::symbol_on(symbol("HTI"), hti_day());

    // When
    let first = h.service.query(&query).await.expect("degraded read");
    let second = h.service.query(&query).await.expect("degraded read");

    // Then: the series store's rows are returned, flagged, and never cached
    assert_eq!(first.source, QuerySource::Degraded);
    assert_eq!(first.result.len(), 4);
    assert_eq!(second.source, QuerySource::Degraded);
    assert!(h.cache.is_empty().await);
}

#[tokio::test]
async fn when_durable_stores_are_down_on_a_miss_then_caller_gets_store_error() {
    // Given
    let h = Harness::new();
    h.series.faults().go_down(StoreErrorKind::Unavailable);
    h.documents.faults().go_down(StoreErrorKind::Unavailable);

    // When
    let by_date = h
        .service
        .query(&SettlementQuery::ByDateAll {
            trading_date: hti_day(),
        })
        .await;
    let listing = h.service.query(&SettlementQuery::ListDates).await;

    // Then: no synthetic fallback data
    assert!(matches!(by_date, Err(QueryError::Store(ref e)) if e.store() == SERIES_STORE));
    assert!(matches!(listing, Err(QueryError::Store(ref e)) if e.store() == DOCUMENT_STORE));
}

#[tokio::test]
async fn when_cache_is_unreachable_then_reads_and_writes_fall_through_to_stores() {
    // Given: a coordinator whose cache rejects every call
    let series = MemorySeriesStore::new();
    let documents = MemoryDocumentStore::new();
    let coordinator = StoreCoordinator::new(
        Arc::new(BrokenCache),
        Arc::new(series.clone()),
        Arc::new(documents.clone()),
    )
    .with_retry(RetryPolicy::fixed(
        Duration::from_millis(1),
        2,
        Duration::from_millis(200),
    ));
    let records = settlex_core::validator::validate(
        settlex_core::parser::parse(HTI_FILE.as_bytes(), hti_day()).candidates,
    )
    .accepted;

    // When
    let result = coordinator.ingest(hti_day(), records, None).await;
    let outcome = coordinator
        .query(&SettlementQuery::symbol_on(symbol("HTI"), hti_day()))
        .await
        .expect("query");
    let health = coordinator.health().await;

    // Then: durable state is complete, reads still work, health names the cache
    assert_eq!(result.status, IngestStatus::Complete);
    assert!(!result.cache_written);
    assert_eq!(outcome.source, QuerySource::Durable);
    assert_eq!(outcome.result.len(), 4);
    assert_eq!(health.state(CACHE_STORE), Some(HealthState::Down));
    assert_eq!(health.state(SERIES_STORE), Some(HealthState::Up));
}

#[tokio::test]
async fn when_everything_is_reachable_then_health_is_all_up() {
    // Given
    let h = Harness::new();

    // When
    let report = h.service.health().await;

    // Then
    assert!(report.all_up());
    assert_eq!(report.collaborators.len(), 3);
}

#[tokio::test]
async fn when_ttl_elapses_then_cached_entry_is_gone() {
    // Given: a cache with a very short default and an explicit entry
    let cache = CacheStore::new(Duration::from_millis(20));
    cache
        .put("settlement:v1:dates".to_string(), "[]".to_string(), None)
        .await;

    // When
    tokio::time::sleep(Duration::from_millis(40)).await;

    // Then
    assert_eq!(cache.get("settlement:v1:dates").await, None);
}
