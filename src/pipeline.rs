//! Categorize, group, order and summarize a batch of threads

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::categorizer::Categorizer;
use crate::dispatcher::{validate_concurrency, validate_timeout, Dispatcher, WorkItem};
use crate::error::{Result, SummaryError};
use crate::models::{CategoryStats, RunStats, SummaryResult, SummaryStatus, Thread};

pub const MAX_THREADS_PER_CATEGORY_LIMIT: usize = 1000;

const DRY_RUN_REASON: &str = "dry run";

/// Knobs for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub concurrency: usize,
    pub timeout: Duration,
    /// Keep only the most recent N threads of each category
    pub max_threads_per_category: Option<usize>,
    /// Threads with an important sender sort ahead of the rest
    pub important_first: bool,
    /// Categorize and order without calling the backend or the cache
    pub dry_run: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            timeout: Duration::from_secs(30),
            max_threads_per_category: None,
            important_first: false,
            dry_run: false,
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<()> {
        validate_concurrency(self.concurrency)?;
        validate_timeout(self.timeout)?;
        if let Some(max) = self.max_threads_per_category {
            if max == 0 || max > MAX_THREADS_PER_CATEGORY_LIMIT {
                return Err(SummaryError::ConfigError(format!(
                    "max_threads_per_category must be between 1 and {}, got {}",
                    MAX_THREADS_PER_CATEGORY_LIMIT, max
                )));
            }
        }
        Ok(())
    }
}

/// A thread together with its outcome
#[derive(Debug, Clone)]
pub struct ThreadSummary {
    pub thread: Arc<Thread>,
    pub result: SummaryResult,
    pub important: bool,
}

/// Ordered results of one category
#[derive(Debug, Clone)]
pub struct CategoryResults {
    pub name: String,
    pub prompt: String,
    pub entries: Vec<ThreadSummary>,
}

impl CategoryResults {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything a renderer needs: categories in rule order plus statistics
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub categories: Vec<CategoryResults>,
    pub stats: RunStats,
}

impl PipelineOutput {
    /// Categories that received at least one thread
    pub fn non_empty(&self) -> impl Iterator<Item = &CategoryResults> {
        self.categories.iter().filter(|c| !c.is_empty())
    }
}

struct Grouped {
    name: String,
    prompt: String,
    threads: Vec<(Arc<Thread>, bool)>,
}

/// Wires the categorizer into the dispatcher
pub struct Pipeline {
    categorizer: Categorizer,
    dispatcher: Dispatcher,
}

impl Pipeline {
    pub fn new(categorizer: Categorizer, dispatcher: Dispatcher) -> Self {
        Self {
            categorizer,
            dispatcher,
        }
    }

    pub fn categorizer(&self) -> &Categorizer {
        &self.categorizer
    }

    /// Run the batch
    ///
    /// Fails only when `options` are out of range; per-thread failures are
    /// reported on the results.
    pub async fn run(&self, threads: Vec<Thread>, options: &PipelineOptions) -> Result<PipelineOutput> {
        options.validate()?;

        let groups = self.group(threads, options);
        let items: Vec<WorkItem> = groups
            .iter()
            .flat_map(|g| {
                g.threads
                    .iter()
                    .map(move |(thread, _)| WorkItem::new(thread.clone(), &g.name, &g.prompt))
            })
            .collect();

        let results = if options.dry_run {
            info!("Dry run: skipping summarization of {} threads", items.len());
            items
                .iter()
                .map(|item| SummaryResult::skipped(item.thread.id(), &item.category, DRY_RUN_REASON))
                .collect()
        } else {
            self.dispatcher
                .dispatch(items, options.concurrency, options.timeout)
                .await?
        };

        Ok(assemble(groups, results))
    }

    /// Categorize, group in rule order, sort and truncate
    fn group(&self, threads: Vec<Thread>, options: &PipelineOptions) -> Vec<Grouped> {
        let mut groups: Vec<Grouped> = self
            .categorizer
            .rules()
            .rules()
            .iter()
            .map(|rule| Grouped {
                name: rule.name().to_string(),
                prompt: rule.prompt().to_string(),
                threads: Vec::new(),
            })
            .collect();

        let mut seen = HashSet::new();
        for thread in threads {
            if !seen.insert(thread.id().to_string()) {
                warn!("Dropping duplicate thread {}", thread.id());
                continue;
            }
            let index = self.categorizer.categorize_index(&thread);
            let important = self.categorizer.has_important_sender(&thread);
            groups[index].threads.push((Arc::new(thread), important));
        }

        for group in &mut groups {
            // Stable: equal keys keep their input order
            if options.important_first {
                group.threads.sort_by(|(a, a_imp), (b, b_imp)| {
                    b_imp
                        .cmp(a_imp)
                        .then(b.most_recent_timestamp().cmp(&a.most_recent_timestamp()))
                });
            } else {
                group
                    .threads
                    .sort_by(|(a, _), (b, _)| b.most_recent_timestamp().cmp(&a.most_recent_timestamp()));
            }

            if let Some(max) = options.max_threads_per_category {
                if group.threads.len() > max {
                    info!(
                        "Category '{}': keeping {} of {} threads",
                        group.name,
                        max,
                        group.threads.len()
                    );
                    group.threads.truncate(max);
                }
            }
        }

        for group in groups.iter().filter(|g| !g.threads.is_empty()) {
            info!("Category '{}': {} threads", group.name, group.threads.len());
        }
        groups
    }
}

/// Put results back in group order and compute statistics
fn assemble(groups: Vec<Grouped>, results: Vec<SummaryResult>) -> PipelineOutput {
    let mut by_thread: HashMap<String, SummaryResult> = results
        .into_iter()
        .map(|r| (r.thread_id().to_string(), r))
        .collect();

    let mut stats = RunStats::default();
    let mut categories = Vec::with_capacity(groups.len());

    for group in groups {
        let mut category_stats = CategoryStats {
            name: group.name.clone(),
            ..CategoryStats::default()
        };
        let mut entries = Vec::with_capacity(group.threads.len());

        for (thread, important) in group.threads {
            let result = by_thread.remove(thread.id()).unwrap_or_else(|| {
                SummaryResult::failed(thread.id(), &group.name, "no result returned for thread")
            });

            stats.record(&result);
            category_stats.threads += 1;
            category_stats.messages += thread.message_count();
            if important {
                category_stats.important += 1;
            }
            match result.status() {
                SummaryStatus::Success => category_stats.successful += 1,
                SummaryStatus::Failed => category_stats.failed += 1,
                SummaryStatus::Skipped => {}
            }

            entries.push(ThreadSummary {
                thread,
                result,
                important,
            });
        }

        stats.categories.push(category_stats);
        categories.push(CategoryResults {
            name: group.name,
            prompt: group.prompt,
            entries,
        });
    }

    info!(
        "Summarized {} threads: {} successful ({} cached), {} failed, {} skipped",
        stats.total, stats.successful, stats.from_cache, stats.failed, stats.skipped
    );

    PipelineOutput { categories, stats }
}
