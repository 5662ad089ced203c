//! Behavior-driven tests for concurrent ingestion
//!
//! Only one ingestion per trading date may be in flight; concurrent callers
//! either share its result or are told it is in progress.

use std::time::{Duration, Instant};

use settlex_core::{
    IngestError, IngestOptions, IngestStatus, QuerySource, SettlementQuery, SingleFlightPolicy,
};
use settlex_tests::{date, hti_day, single_row_file, Harness, HTI_FILE};

fn slow_harness(policy: SingleFlightPolicy) -> Harness {
    let h = Harness::with_policy(policy);
    h.publish(hti_day(), HTI_FILE);
    h.http.set_latency(Duration::from_millis(100));
    h
}

#[tokio::test]
async fn when_two_callers_ingest_the_same_date_then_they_share_one_write() {
    // Given: a slow download and the join policy
    let h = slow_harness(SingleFlightPolicy::Join);

    // When: two ingestions for the same date start together
    let (first, second) = tokio::join!(
        h.service.ingest(hti_day(), IngestOptions::default()),
        h.service.ingest(hti_day(), IngestOptions::default()),
    );

    // Then: one download, one write per store, one shared result
    let first = first.expect("first");
    let second = second.expect("second");
    assert_eq!(first.run_id, second.run_id);
    assert_eq!(first.status, IngestStatus::Complete);
    assert_eq!(h.http.request_count(), 1);
    assert_eq!(h.series.write_calls(), 1);
    assert_eq!(h.documents.write_calls(), 1);
}

#[tokio::test]
async fn when_reject_policy_is_set_then_second_caller_is_told_ingestion_is_in_progress() {
    // Given
    let h = slow_harness(SingleFlightPolicy::Reject);

    // When
    let (first, second) = tokio::join!(
        h.service.ingest(hti_day(), IngestOptions::default()),
        h.service.ingest(hti_day(), IngestOptions::default()),
    );

    // Then: an explicit signal, never a silently dropped write
    assert!(first.is_ok());
    assert_eq!(
        second,
        Err(IngestError::ConcurrentIngestionInProgress {
            trading_date: hti_day()
        })
    );
    assert_eq!(h.series.write_calls(), 1);
}

#[tokio::test]
async fn when_different_dates_are_ingested_together_then_both_run() {
    // Given
    let h = slow_harness(SingleFlightPolicy::Reject);
    let other = date("2023-08-23");
    h.publish(other, &single_row_file("HTI2309", 3800));

    // When
    let (first, second) = tokio::join!(
        h.service.ingest(hti_day(), IngestOptions::default()),
        h.service.ingest(other, IngestOptions::default()),
    );

    // Then
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(h.series.write_calls(), 2);
}

#[tokio::test]
async fn when_one_date_is_being_ingested_then_queries_for_another_date_do_not_wait() {
    // Given: the 21st is stored, the cache is cold and the 22nd's download hangs
    let h = Harness::new();
    let stored = date("2023-08-21");
    h.publish(stored, &single_row_file("HTI2309", 3800));
    h.service
        .ingest(stored, IngestOptions::default())
        .await
        .expect("stored");
    h.cache.invalidate_prefix("").await;
    h.publish(hti_day(), HTI_FILE);
    h.http.set_latency(Duration::from_secs(30));
    let slow = h.service.spawn_ingest(hti_day(), IngestOptions::default());
    while !h.service.coordinator().flights().is_running(hti_day()) {
        tokio::task::yield_now().await;
    }

    // When: the 21st is read from durable storage
    let started = Instant::now();
    let outcome = tokio::time::timeout(
        Duration::from_millis(500),
        h.service.query(&SettlementQuery::ByDateAll {
            trading_date: stored,
        }),
    )
    .await
    .expect("query waited on another date's ingestion")
    .expect("query");

    // Then: it answers right away while the 22nd is still in flight
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(outcome.source, QuerySource::Durable);
    assert_eq!(outcome.result.len(), 1);
    assert!(!slow.is_finished());
    slow.abort();
}

#[tokio::test]
async fn when_ingestion_is_spawned_then_caller_can_poll_then_await_it() {
    // Given
    let h = slow_harness(SingleFlightPolicy::Join);

    // When: the ingestion runs on its own task
    let handle = h.service.spawn_ingest(hti_day(), IngestOptions::default());

    // Then: it is still running right away, and awaiting yields the result
    assert!(!handle.is_finished());
    let result = handle.await.expect("ingest");
    assert_eq!(result.accepted_count, 4);
    assert!(!h.service.coordinator().flights().is_running(hti_day()));
}

#[tokio::test]
async fn when_the_running_ingestion_is_aborted_then_waiting_callers_are_released() {
    // Given: a spawned ingestion stuck on a slow download
    let h = slow_harness(SingleFlightPolicy::Join);
    h.http.set_latency(Duration::from_secs(30));
    let leader = h.service.spawn_ingest(hti_day(), IngestOptions::default());
    while !h.service.coordinator().flights().is_running(hti_day()) {
        tokio::task::yield_now().await;
    }
    let follower = h.service.spawn_ingest(hti_day(), IngestOptions::default());
    tokio::time::sleep(Duration::from_millis(20)).await;

    // When
    leader.abort();

    // Then: the follower hears "in progress" instead of hanging
    assert_eq!(
        follower.await,
        Err(IngestError::ConcurrentIngestionInProgress {
            trading_date: hti_day()
        })
    );
    assert_eq!(h.series.write_calls(), 0);
    assert!(!h.service.coordinator().flights().is_running(hti_day()));
}

#[tokio::test]
async fn when_a_previous_run_has_finished_then_a_new_run_is_not_joined_to_it() {
    // Given
    let h = Harness::new();
    h.publish(hti_day(), HTI_FILE);
    let first = h
        .service
        .ingest(hti_day(), IngestOptions::default())
        .await
        .expect("first");

    // When
    let second = h
        .service
        .ingest(hti_day(), IngestOptions::default())
        .await
        .expect("second");

    // Then
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(h.series.write_calls(), 2);
}
