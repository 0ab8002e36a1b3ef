//! Tests for concurrent summary dispatch
//!
//! These tests drive the dispatcher with an instrumented backend to check
//! completeness, failure isolation, the concurrency bound and cache reuse.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{create_test_thread, FakeBackend};
use gmail_summary::cache::CacheStore;
use gmail_summary::dispatcher::{Dispatcher, WorkItem};
use gmail_summary::error::SummaryError;
use gmail_summary::models::{SummarySource, SummaryStatus};
use tempfile::TempDir;

fn work_items(count: usize) -> Vec<WorkItem> {
    (0..count)
        .map(|i| {
            let thread = create_test_thread(&format!("t{:02}", i), &[], i as i64);
            WorkItem::new(Arc::new(thread), "General", "Provide a brief summary.")
        })
        .collect()
}

// ============================================================================
// Completeness and isolation
// ============================================================================

#[tokio::test]
async fn test_every_item_gets_exactly_one_result() {
    let backend = Arc::new(FakeBackend::new());
    let dispatcher = Dispatcher::new(backend.clone(), None);

    let results = dispatcher
        .dispatch(work_items(12), 4, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(results.len(), 12);
    let ids: HashSet<&str> = results.iter().map(|r| r.thread_id()).collect();
    assert_eq!(ids.len(), 12);
    assert!(results.iter().all(|r| r.is_success()));
    assert_eq!(backend.calls(), 12);
}

#[tokio::test]
async fn test_one_failure_does_not_affect_others() {
    let backend = Arc::new(FakeBackend::new().failing_for("t03"));
    let dispatcher = Dispatcher::new(backend.clone(), None);

    let results = dispatcher
        .dispatch(work_items(6), 3, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(results.len(), 6);
    let failed: Vec<_> = results
        .iter()
        .filter(|r| r.status() == SummaryStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].thread_id(), "t03");
    assert!(failed[0].error().unwrap().contains("model refused"));
    assert_eq!(
        results.iter().filter(|r| r.is_success()).count(),
        5
    );
}

#[tokio::test]
async fn test_panicking_backend_fails_only_its_item() {
    let backend = Arc::new(FakeBackend::new().panicking_for("t01"));
    let cache = Arc::new(CacheStore::in_memory());
    let dispatcher = Dispatcher::new(backend.clone(), Some(cache.clone()));

    let results = dispatcher
        .dispatch(work_items(3), 2, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    let crashed = results.iter().find(|r| r.thread_id() == "t01").unwrap();
    assert_eq!(crashed.status(), SummaryStatus::Failed);
    assert_eq!(crashed.category(), "General");
    assert!(crashed.error().unwrap().contains("panicked"));

    let others: Vec<_> = results.iter().filter(|r| r.thread_id() != "t01").collect();
    assert_eq!(others.len(), 2);
    assert!(others.iter().all(|r| r.is_success()));
    assert_eq!(backend.calls(), 3);
    assert_eq!(cache.len().await, 2);
}

#[tokio::test]
async fn test_slow_backend_times_out_per_item() {
    let backend = Arc::new(FakeBackend::new().with_delay(Duration::from_secs(3)));
    let dispatcher = Dispatcher::new(backend, None);

    let started = std::time::Instant::now();
    let results = dispatcher
        .dispatch(work_items(2), 2, Duration::from_secs(1))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(results.len(), 2);
    for result in &results {
        assert_eq!(result.status(), SummaryStatus::Failed);
        assert!(result.error().unwrap().contains("timed out"));
    }
}

// ============================================================================
// Concurrency bound
// ============================================================================

#[tokio::test]
async fn test_in_flight_calls_never_exceed_concurrency() {
    let backend = Arc::new(FakeBackend::new().with_delay(Duration::from_millis(50)));
    let dispatcher = Dispatcher::new(backend.clone(), None);

    let results = dispatcher
        .dispatch(work_items(10), 3, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(results.len(), 10);
    assert_eq!(backend.calls(), 10);
    assert!(backend.max_in_flight() <= 3);
    assert!(backend.max_in_flight() >= 2);
}

#[tokio::test]
async fn test_concurrency_of_one_is_sequential() {
    let backend = Arc::new(FakeBackend::new().with_delay(Duration::from_millis(10)));
    let dispatcher = Dispatcher::new(backend.clone(), None);

    dispatcher
        .dispatch(work_items(4), 1, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(backend.max_in_flight(), 1);
}

#[tokio::test]
async fn test_out_of_range_settings_are_rejected() {
    let backend = Arc::new(FakeBackend::new());
    let dispatcher = Dispatcher::new(backend.clone(), None);

    let result = dispatcher
        .dispatch(work_items(2), 21, Duration::from_secs(5))
        .await;
    assert!(matches!(result, Err(SummaryError::ConfigError(_))));

    let result = dispatcher
        .dispatch(work_items(2), 2, Duration::from_secs(601))
        .await;
    assert!(matches!(result, Err(SummaryError::ConfigError(_))));

    assert_eq!(backend.calls(), 0);
}

// ============================================================================
// Cache reuse
// ============================================================================

#[tokio::test]
async fn test_second_dispatch_hits_cache() {
    let backend = Arc::new(FakeBackend::new());
    let cache = Arc::new(CacheStore::in_memory());
    let dispatcher = Dispatcher::new(backend.clone(), Some(cache));

    let first = dispatcher
        .dispatch(work_items(1), 1, Duration::from_secs(5))
        .await
        .unwrap();
    let second = dispatcher
        .dispatch(work_items(1), 1, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(backend.calls(), 1);
    assert_eq!(first[0].source(), Some(SummarySource::Backend));
    assert_eq!(second[0].source(), Some(SummarySource::Cache));
    assert_eq!(first[0].summary(), second[0].summary());
}

#[tokio::test]
async fn test_cache_survives_reopen() {
    let dir = TempDir::new().unwrap();

    let backend = Arc::new(FakeBackend::new());
    let cache = Arc::new(CacheStore::open(dir.path()).await);
    let dispatcher = Dispatcher::new(backend.clone(), Some(cache));
    dispatcher
        .dispatch(work_items(3), 2, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(backend.calls(), 3);

    // Written once, after the batch
    assert!(dir.path().join("summaries.json").exists());

    let fresh_backend = Arc::new(FakeBackend::new());
    let reopened = Arc::new(CacheStore::open(dir.path()).await);
    assert_eq!(reopened.len().await, 3);
    let dispatcher = Dispatcher::new(fresh_backend.clone(), Some(reopened));
    let results = dispatcher
        .dispatch(work_items(3), 2, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(fresh_backend.calls(), 0);
    assert!(results
        .iter()
        .all(|r| r.source() == Some(SummarySource::Cache)));
}

#[tokio::test]
async fn test_changed_prompt_misses_cache() {
    let backend = Arc::new(FakeBackend::new());
    let cache = Arc::new(CacheStore::in_memory());
    let dispatcher = Dispatcher::new(backend.clone(), Some(cache));

    let thread = Arc::new(create_test_thread("t1", &[], 1));
    dispatcher
        .dispatch(
            vec![WorkItem::new(thread.clone(), "General", "Summarize.")],
            1,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    dispatcher
        .dispatch(
            vec![WorkItem::new(thread, "General", "List the action items.")],
            1,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert_eq!(backend.calls(), 2);
    assert_eq!(
        backend.prompts(),
        vec!["Summarize.".to_string(), "List the action items.".to_string()]
    );
}
