//! Gmail Thread Summaries
//!
//! Sorts email threads into user-defined categories by their labels and
//! produces a short summary of each thread with the Claude CLI.
//!
//! # Overview
//!
//! - **Categorization**: Ordered label rules with aliases and globs, first match wins
//! - **Important senders**: Regex patterns that flag threads for priority ordering
//! - **Summarization**: Bounded-concurrency calls to a pluggable backend with per-thread timeouts
//! - **Caching**: Persistent summary cache keyed by a content fingerprint
//! - **Reporting**: Per-category Markdown report and run statistics
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use gmail_summary::{
//!     ClaudeCliBackend, CacheStore, Config, Dispatcher, JsonMailSource, MailSource, Pipeline,
//!     PipelineOptions,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let threads = JsonMailSource::new("threads.json").fetch_threads(None).await?;
//!
//!     let backend = Arc::new(ClaudeCliBackend::new("claude", None));
//!     let cache = Arc::new(CacheStore::open(config.cache_dir()).await);
//!     let pipeline = Pipeline::new(config.categorizer()?, Dispatcher::new(backend, Some(cache)));
//!
//!     let output = pipeline.run(threads, &PipelineOptions::default()).await?;
//!     println!("{} summaries", output.stats.successful);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`backend`] - Summarization backends and thread content preparation
//! - [`cache`] - Fingerprinting and the persistent summary cache
//! - [`categorizer`] - Category rules, rule sets and important senders
//! - [`cli`] - Command-line interface and run orchestration
//! - [`config`] - Configuration management
//! - [`dispatcher`] - Concurrent, cache-aware summary dispatch
//! - [`error`] - Error types and result aliases
//! - [`mail_source`] - Thread sources (JSON export)
//! - [`matcher`] - Label expressions
//! - [`models`] - Core data structures
//! - [`pipeline`] - Grouping, ordering and end-to-end runs

pub mod backend;
pub mod cache;
pub mod categorizer;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod mail_source;
pub mod matcher;
pub mod models;
pub mod pipeline;

// Re-export commonly used types for convenience
pub use error::{Result, SummaryError};

// Core data models
pub use models::{
    CategoryStats, Headers, Message, RunStats, SummaryResult, SummarySource, SummaryStatus,
    Thread,
};

// Categorization
pub use categorizer::{categorize, Categorizer, CategoryRule, ImportantSenders, RuleSet};
pub use matcher::LabelExpression;

// Summarization
pub use backend::{ClaudeCliBackend, SummaryBackend};
pub use cache::{fingerprint, CacheEntry, CacheStore, Fingerprint};
pub use dispatcher::{Dispatcher, WorkItem};
pub use mail_source::{JsonMailSource, MailSource};
pub use pipeline::{CategoryResults, Pipeline, PipelineOptions, PipelineOutput, ThreadSummary};

// Config types
pub use config::{BackendConfig, CacheConfig, CategoryConfig, Config};

// CLI types (for binary usage)
pub use cli::{Cli, Commands, ProgressReporter, Report};
