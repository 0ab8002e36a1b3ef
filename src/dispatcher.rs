//! Concurrent, cache-aware summarization of categorized threads

use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{
    prepare_thread_content, truncate_content_if_needed, SummaryBackend, MAX_CONTENT_TOKENS,
};
use crate::cache::{fingerprint, CacheEntry, CacheStore, Fingerprint};
use crate::error::{Result, SummaryError};
use crate::models::{SummaryResult, SummarySource, Thread};

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 20;
pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 600;

/// Progress callback invoked once per finished item with
/// (completed, total, served_from_cache)
pub type ProgressCallback = Arc<dyn Fn(usize, usize, bool) + Send + Sync>;

/// One thread to summarize with the prompt of its category
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub thread: Arc<Thread>,
    pub category: String,
    pub prompt: String,
}

impl WorkItem {
    pub fn new(thread: Arc<Thread>, category: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            thread,
            category: category.into(),
            prompt: prompt.into(),
        }
    }
}

pub fn validate_concurrency(concurrency: usize) -> Result<()> {
    if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
        return Err(SummaryError::ConfigError(format!(
            "concurrency must be between {} and {}, got {}",
            MIN_CONCURRENCY, MAX_CONCURRENCY, concurrency
        )));
    }
    Ok(())
}

pub fn validate_timeout(timeout: Duration) -> Result<()> {
    let min = Duration::from_secs(MIN_TIMEOUT_SECS);
    let max = Duration::from_secs(MAX_TIMEOUT_SECS);
    if timeout < min || timeout > max {
        return Err(SummaryError::ConfigError(format!(
            "timeout must be between {} and {} seconds, got {:?}",
            MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS, timeout
        )));
    }
    Ok(())
}

/// Runs backend calls on a bounded pool, serving repeats from the cache
pub struct Dispatcher {
    backend: Arc<dyn SummaryBackend>,
    cache: Option<Arc<CacheStore>>,
    on_progress: Option<ProgressCallback>,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn SummaryBackend>, cache: Option<Arc<CacheStore>>) -> Self {
        Self {
            backend,
            cache,
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn backend(&self) -> &Arc<dyn SummaryBackend> {
        &self.backend
    }

    pub fn cache(&self) -> Option<&Arc<CacheStore>> {
        self.cache.as_ref()
    }

    /// Summarize every item, returning exactly one result per item in no
    /// particular order
    ///
    /// Backend failures and timeouts are captured on the item's result. The
    /// only errors returned are out-of-range `concurrency` or `timeout`.
    pub async fn dispatch(
        &self,
        items: Vec<WorkItem>,
        concurrency: usize,
        timeout: Duration,
    ) -> Result<Vec<SummaryResult>> {
        validate_concurrency(concurrency)?;
        validate_timeout(timeout)?;

        let total = items.len();
        let completed = AtomicUsize::new(0);
        let model_id = self.backend.model_id().to_string();
        let mut results = Vec::with_capacity(total);
        let mut misses = Vec::new();

        for item in items {
            let key = fingerprint(&item.thread, &item.prompt, &model_id);
            match self.lookup(&key).await {
                Some(entry) => {
                    debug!("Using cached summary for thread {}", item.thread.id());
                    results.push(SummaryResult::success(
                        item.thread.id(),
                        &item.category,
                        entry.summary,
                        SummarySource::Cache,
                    ));
                    self.report(&completed, total, true);
                }
                None => misses.push((item, key)),
            }
        }

        info!(
            "Dispatching {} threads: {} cached, {} to summarize (concurrency {})",
            total,
            results.len(),
            misses.len(),
            concurrency
        );

        let generated: Vec<SummaryResult> = stream::iter(misses)
            .map(|(item, key)| {
                let completed = &completed;
                let thread_id = item.thread.id().to_string();
                let category = item.category.clone();
                // Spawned so a panicking backend call fails only its own item
                let task = TaskGuard(tokio::spawn(summarize_one(
                    Arc::clone(&self.backend),
                    self.cache.clone(),
                    item,
                    key,
                    model_id.clone(),
                    timeout,
                )));
                async move {
                    let mut task = task;
                    let result = match (&mut task.0).await {
                        Ok(result) => result,
                        Err(e) => {
                            error!("Summarization task for thread {} failed: {}", thread_id, e);
                            SummaryResult::failed(
                                thread_id,
                                category,
                                format!("summarization task panicked: {}", e),
                            )
                        }
                    };
                    self.report(completed, total, false);
                    result
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.flush().await {
                warn!("{}", e);
            }
        }

        results.extend(generated);
        Ok(results)
    }

    async fn lookup(&self, key: &Fingerprint) -> Option<CacheEntry> {
        match &self.cache {
            Some(cache) => cache.get(key).await,
            None => None,
        }
    }

    fn report(&self, completed: &AtomicUsize, total: usize, from_cache: bool) {
        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(on_progress) = &self.on_progress {
            on_progress(done, total, from_cache);
        }
    }
}

/// Aborts the task when dropped, so cancelling `dispatch` stops its workers
struct TaskGuard<T>(JoinHandle<T>);

impl<T> Drop for TaskGuard<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn summarize_one(
    backend: Arc<dyn SummaryBackend>,
    cache: Option<Arc<CacheStore>>,
    item: WorkItem,
    key: Fingerprint,
    model_id: String,
    timeout: Duration,
) -> SummaryResult {
    let thread_id = item.thread.id();
    let content = truncate_content_if_needed(&prepare_thread_content(&item.thread), MAX_CONTENT_TOKENS);

    // Hard wrapper so a backend that ignores its timeout still frees the slot
    let outcome = tokio::time::timeout(timeout, backend.summarize(&content, &item.prompt, timeout))
        .await
        .unwrap_or(Err(SummaryError::BackendTimeout {
            seconds: timeout.as_secs(),
        }));

    match outcome {
        Ok(summary) => {
            debug!("Generated summary for thread {}", thread_id);
            if let Some(cache) = &cache {
                cache.put(&key, CacheEntry::new(summary.as_str(), model_id)).await;
            }
            SummaryResult::success(thread_id, &item.category, summary, SummarySource::Backend)
        }
        Err(e) => {
            if e.is_item_scoped() {
                warn!("Failed to summarize thread {}: {}", thread_id, e);
            } else {
                error!("Unexpected failure summarizing thread {}: {}", thread_id, e);
            }
            SummaryResult::failed(thread_id, &item.category, e.to_string())
        }
    }
}
