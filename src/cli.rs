//! Command-line interface

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gmail-summary")]
#[command(version)]
#[command(about = "Categorize email threads and summarize them with Claude", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Categorize and summarize threads, then write the report
    Run(RunArgs),

    /// Inspect or maintain the summary cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Check that the summarization backend can be started
    TestBackend,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Exported threads (JSON array of thread records)
    #[arg(short, long, default_value = "threads.json")]
    pub input: PathBuf,

    /// Report file (overrides output_file from the config)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Read at most this many threads from the input
    #[arg(long)]
    pub limit: Option<usize>,

    /// Keep only the most recent N threads per category
    #[arg(long)]
    pub max_threads: Option<usize>,

    /// Parallel summaries (1-20)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Seconds before a single summary is abandoned (1-600)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// List threads important senders first within each category
    #[arg(long)]
    pub important_first: bool,

    /// Categorize only; no summaries are generated
    #[arg(long)]
    pub dry_run: bool,

    /// Neither read nor write the summary cache
    #[arg(long)]
    pub no_cache: bool,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Show cache location and size
    Status,

    /// Remove every cached summary
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Remove summaries older than the given age
    Cleanup {
        /// Maximum age in days
        #[arg(long, default_value_t = 30)]
        max_age: u32,
    },
}

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Truncate a string to max_len characters, adding "..." if truncated
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len.saturating_sub(3)).collect::<String>())
    }
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    /// Share a MultiProgress with the tracing writer so logs print above bars
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        // Use {elapsed} for human-readable format (e.g., "1s", "234ms")
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        Self {
            multi,
            spinner_style,
            bar_style,
        }
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn add_progress_bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(len));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

use crate::models::SummaryStatus;
use crate::pipeline::PipelineOutput;
use chrono::{DateTime, TimeZone, Utc};

/// Result of one `run` invocation, rendered as Markdown
pub struct Report {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: i64,
    /// Where the threads came from
    pub source: String,
    pub dry_run: bool,
    pub output: PipelineOutput,
}

impl Report {
    /// Generate Markdown report
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let stats = &self.output.stats;

        if self.dry_run {
            md.push_str("# Inbox Summary (DRY RUN)\n\n");
            md.push_str("> **DRY RUN MODE** - Threads were categorized but not summarized.\n\n");
        } else {
            md.push_str("# Inbox Summary\n\n");
        }
        md.push_str(&format!(
            "Generated: {}\n\n",
            self.completed_at.format("%Y-%m-%d %H:%M:%S")
        ));

        md.push_str("## Overview\n\n");
        md.push_str(&format!("- **Run ID:** {}\n", self.run_id));
        md.push_str(&format!("- **Source:** {}\n", self.source));
        md.push_str(&format!("- **Threads:** {}\n", stats.total));
        if !self.dry_run {
            md.push_str(&format!(
                "- **Summaries:** {} generated, {} from cache, {} failed ({:.1}% success)\n",
                stats.successful - stats.from_cache,
                stats.from_cache,
                stats.failed,
                stats.success_rate()
            ));
        }
        md.push_str(&format!(
            "- **Processing time:** {} minutes {} seconds\n\n",
            self.duration_seconds / 60,
            self.duration_seconds % 60
        ));

        if stats.total == 0 {
            md.push_str("_No threads to summarize._\n");
            return md;
        }

        md.push_str("| Category | Threads | Messages | Important |\n");
        md.push_str("|----------|---------|----------|-----------|\n");
        for category in stats.categories.iter().filter(|c| c.threads > 0) {
            md.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                category.name.replace('|', "\\|"),
                category.threads,
                category.messages,
                category.important
            ));
        }
        md.push('\n');

        for category in self.output.non_empty() {
            md.push_str(&format!(
                "## {} ({} threads)\n\n",
                category.name,
                category.entries.len()
            ));

            for entry in &category.entries {
                let thread = &entry.thread;
                let marker = if entry.important { " ⭐" } else { "" };
                md.push_str(&format!(
                    "### [{}]({}){}\n\n",
                    thread.subject().replace(['[', ']'], ""),
                    thread.web_url(),
                    marker
                ));

                let participants = thread.participants();
                md.push_str(&format!(
                    "- **Participants:** {}\n",
                    truncate_string(&participants.join(", "), 120)
                ));
                md.push_str(&format!("- **Messages:** {}\n", thread.message_count()));
                if let Some(last) = Utc
                    .timestamp_millis_opt(thread.most_recent_timestamp())
                    .single()
                    .filter(|_| thread.most_recent_timestamp() > 0)
                {
                    md.push_str(&format!(
                        "- **Last activity:** {}\n",
                        last.format("%Y-%m-%d %H:%M")
                    ));
                }
                md.push('\n');

                match entry.result.status() {
                    SummaryStatus::Success => {
                        md.push_str(entry.result.summary().unwrap_or_default());
                        md.push_str("\n\n");
                    }
                    SummaryStatus::Failed => {
                        md.push_str(&format!(
                            "_Summary unavailable: {}_\n\n",
                            entry.result.error().unwrap_or("unknown error")
                        ));
                    }
                    SummaryStatus::Skipped => {
                        md.push_str("_Not summarized (dry run)._\n\n");
                    }
                }
            }
        }

        if !stats.error_types.is_empty() {
            md.push_str("## Errors\n\n");
            md.push_str("| Error | Threads |\n");
            md.push_str("|-------|---------|\n");
            for (error, count) in &stats.error_types {
                md.push_str(&format!(
                    "| {} | {} |\n",
                    truncate_string(error, 80).replace('|', "\\|"),
                    count
                ));
            }
            md.push('\n');
        }

        if self.dry_run {
            md.push_str("---\n\n");
            md.push_str("_To generate summaries, run the command again without the `--dry-run` flag._\n");
        }

        md
    }

    /// Save report to file
    pub async fn save(&self, path: &std::path::Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let markdown = self.to_markdown();
        tokio::fs::write(path, markdown).await?;
        Ok(())
    }
}

use crate::backend::{ClaudeCliBackend, SummaryBackend};
use crate::cache::CacheStore;
use crate::config::Config;
use crate::dispatcher::{Dispatcher, ProgressCallback};
use crate::error::Result;
use crate::mail_source::{JsonMailSource, MailSource};
use crate::pipeline::{Pipeline, PipelineOptions};
use std::io::{self, Write};
use std::sync::Arc;

/// Apply command-line overrides on top of the loaded configuration
pub fn apply_overrides(config: &mut Config, args: &RunArgs) -> Result<()> {
    if let Some(output) = &args.output {
        config.output_file = output.to_string_lossy().into_owned();
    }
    if let Some(max) = args.max_threads {
        config.max_threads_per_category = Some(max);
    }
    if let Some(concurrency) = args.concurrency {
        config.backend.concurrency = concurrency;
    }
    if let Some(timeout) = args.timeout {
        config.backend.timeout_secs = timeout;
    }
    if args.no_cache {
        config.cache.enabled = false;
    }
    config.validate()
}

/// Pipeline options derived from the effective configuration
pub fn pipeline_options(config: &Config, args: &RunArgs) -> PipelineOptions {
    PipelineOptions {
        concurrency: config.backend.concurrency,
        timeout: config.timeout(),
        max_threads_per_category: config.max_threads_per_category,
        important_first: args.important_first,
        dry_run: args.dry_run,
    }
}

/// Main orchestration function for the `run` command
///
/// Loads configuration, reads threads from the export, categorizes and
/// summarizes them, trims old cache entries and writes the Markdown report.
pub async fn run_pipeline(cli: &Cli, args: &RunArgs, multi: MultiProgress) -> Result<Report> {
    let reporter = ProgressReporter::with_multi_progress(multi);
    let started_at = Utc::now();
    let run_id = uuid::Uuid::new_v4().to_string();
    tracing::info!("Starting summary run: {}", run_id);

    // Step 1: Load configuration
    let config_spinner = reporter.add_spinner("Loading configuration...");
    let mut config = Config::load(&cli.config).await?;
    apply_overrides(&mut config, args)?;
    let categorizer = config.categorizer()?;
    let options = pipeline_options(&config, args);
    options.validate()?;
    reporter.finish_spinner(
        &config_spinner,
        &format!(
            "Configuration loaded ({} categories)",
            categorizer.rules().len()
        ),
    );

    // Step 2: Read threads
    let source = JsonMailSource::new(&args.input);
    let fetch_spinner = reporter.add_spinner(&format!("Reading threads from {:?}...", args.input));
    let threads = source.fetch_threads(args.limit).await?;
    reporter.finish_spinner(&fetch_spinner, &format!("Loaded {} threads", threads.len()));

    // Step 3: Backend and cache
    let backend: Arc<dyn SummaryBackend> = Arc::new(ClaudeCliBackend::new(
        config.backend.cli_path.clone(),
        config.backend.model.clone(),
    ));
    let cache = if config.cache.enabled && !args.dry_run {
        Some(Arc::new(CacheStore::open(config.cache_dir()).await))
    } else {
        None
    };

    // Step 4: Categorize and summarize
    let summarize_bar = reporter.add_progress_bar(threads.len() as u64, "Summarizing threads...");
    let bar = summarize_bar.clone();
    let cached = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let cached_counter = Arc::clone(&cached);
    let on_progress: ProgressCallback = Arc::new(move |done, total, from_cache| {
        if from_cache {
            cached_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        bar.set_length(total as u64);
        bar.set_position(done as u64);
        bar.set_message(format!(
            "{} cached",
            cached_counter.load(std::sync::atomic::Ordering::Relaxed)
        ));
    });

    let dispatcher = Dispatcher::new(backend, cache.clone()).with_progress(on_progress);
    let pipeline = Pipeline::new(categorizer, dispatcher);
    let output = pipeline.run(threads, &options).await?;
    reporter.finish_spinner(
        &summarize_bar,
        &format!(
            "Processed {} threads ({} successful, {} failed)",
            output.stats.total, output.stats.successful, output.stats.failed
        ),
    );

    // Step 5: Trim stale cache entries
    if let Some(cache) = &cache {
        match cache.cleanup_older_than(config.cache.max_age_days).await {
            Ok(0) => {}
            Ok(removed) => tracing::info!("Removed {} stale cache entries", removed),
            Err(e) => tracing::warn!("Cache cleanup failed: {}", e),
        }
    }

    // Step 6: Write report
    let completed_at = Utc::now();
    let report = Report {
        run_id,
        started_at,
        completed_at,
        duration_seconds: (completed_at - started_at).num_seconds(),
        source: source.describe(),
        dry_run: args.dry_run,
        output,
    };

    let output_path = PathBuf::from(&config.output_file);
    report.save(&output_path).await?;
    tracing::info!("Report written to {:?}", output_path);

    Ok(report)
}

/// Open the configured cache for maintenance commands
pub async fn open_cache(config: &Config) -> CacheStore {
    CacheStore::open(config.cache_dir()).await
}

/// Run the backend health check
pub async fn test_backend(config: &Config) -> Result<String> {
    let backend = ClaudeCliBackend::new(config.backend.cli_path.clone(), config.backend.model.clone());
    backend.health_check().await
}

/// Prompt user for confirmation
pub fn confirm_action(prompt: &str) -> Result<bool> {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SummaryError;
    use crate::categorizer::{Categorizer, CategoryRule, ImportantSenders, RuleSet};
    use crate::models::{Headers, Message, SummarySource, Thread};
    use async_trait::async_trait;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::parse_from([
            "gmail-summary",
            "--verbose",
            "run",
            "--input",
            "export.json",
            "--concurrency",
            "3",
            "--max-threads",
            "10",
            "--dry-run",
            "--no-cache",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.input, PathBuf::from("export.json"));
                assert_eq!(args.concurrency, Some(3));
                assert_eq!(args.max_threads, Some(10));
                assert!(args.dry_run);
                assert!(args.no_cache);
                assert!(!args.important_first);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_cache_commands() {
        let cli = Cli::parse_from(["gmail-summary", "cache", "cleanup"]);
        assert!(matches!(
            cli.command,
            Commands::Cache {
                action: CacheCommand::Cleanup { max_age: 30 }
            }
        ));

        let cli = Cli::parse_from(["gmail-summary", "cache", "clear", "--force"]);
        assert!(matches!(
            cli.command,
            Commands::Cache {
                action: CacheCommand::Clear { force: true }
            }
        ));
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = Config::default();
        let args = RunArgs {
            output: Some(PathBuf::from("out/report.md")),
            max_threads: Some(7),
            concurrency: Some(9),
            timeout: Some(120),
            no_cache: true,
            ..RunArgs::default()
        };
        apply_overrides(&mut config, &args).unwrap();
        assert_eq!(config.output_file, "out/report.md");
        assert_eq!(config.max_threads_per_category, Some(7));
        assert_eq!(config.backend.concurrency, 9);
        assert_eq!(config.backend.timeout_secs, 120);
        assert!(!config.cache.enabled);

        let options = pipeline_options(&config, &args);
        assert_eq!(options.concurrency, 9);
        assert_eq!(options.timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_apply_overrides_rejects_out_of_range() {
        let mut config = Config::default();
        let args = RunArgs {
            concurrency: Some(50),
            ..RunArgs::default()
        };
        assert!(matches!(
            apply_overrides(&mut config, &args),
            Err(SummaryError::ConfigError(_))
        ));
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("a longer sentence", 10), "a longe...");
        assert_eq!(truncate_string("ééééééé", 5), "éé...");
    }

    struct FixedBackend;

    #[async_trait]
    impl SummaryBackend for FixedBackend {
        async fn summarize(&self, content: &str, _prompt: &str, _timeout: Duration) -> Result<String> {
            if content.contains("broken") {
                Err(SummaryError::BackendTimeout { seconds: 30 })
            } else {
                Ok("Everything is on track.".to_string())
            }
        }

        fn model_id(&self) -> &str {
            "fixed"
        }

        async fn health_check(&self) -> Result<String> {
            Ok("fixed".to_string())
        }
    }

    fn thread(id: &str, subject: &str, body: &str, labels: &[&str]) -> Thread {
        let message = Message {
            id: format!("{}-m", id),
            sender: "alice@example.com".to_string(),
            recipients: vec!["bob@example.com".to_string()],
            subject: subject.to_string(),
            body: body.to_string(),
            headers: Headers::new(),
            timestamp: Some(1_700_000_000_000),
            labels: vec![],
        };
        Thread::new(id, vec![message], labels.iter().copied()).unwrap()
    }

    async fn report(dry_run: bool) -> Report {
        let rules = RuleSet::new(vec![CategoryRule::new("Code", ["github"], "Summarize code.")]).unwrap();
        let pipeline = Pipeline::new(
            Categorizer::new(rules, ImportantSenders::new(["alice@"]).unwrap()),
            Dispatcher::new(Arc::new(FixedBackend), None),
        );
        let threads = vec![
            thread("t1", "Re: CI green", "all good", &["github"]),
            thread("t2", "Lunch", "broken build", &[]),
        ];
        let options = PipelineOptions {
            dry_run,
            ..PipelineOptions::default()
        };
        let output = pipeline.run(threads, &options).await.unwrap();
        let now = Utc::now();
        Report {
            run_id: "run-1".to_string(),
            started_at: now,
            completed_at: now,
            duration_seconds: 75,
            source: "JSON export threads.json".to_string(),
            dry_run,
            output,
        }
    }

    #[tokio::test]
    async fn test_report_markdown() {
        let report = report(false).await;
        assert_eq!(
            report.output.categories[0].entries[0].result.source(),
            Some(SummarySource::Backend)
        );

        let md = report.to_markdown();
        assert!(md.starts_with("# Inbox Summary\n"));
        assert!(md.contains("- **Threads:** 2"));
        assert!(md.contains("1 generated, 0 from cache, 1 failed (50.0% success)"));
        assert!(md.contains("1 minutes 15 seconds"));
        assert!(md.contains("## Code (1 threads)"));
        assert!(md.contains("## Uncategorized (1 threads)"));
        assert!(md.contains("### [Re: CI green](https://mail.google.com/mail/u/0/#search/subject%3A(CI%20green)) ⭐"));
        assert!(md.contains("Everything is on track."));
        assert!(md.contains("_Summary unavailable: Summarization backend timed out after 30 seconds_"));
        assert!(md.contains("## Errors"));
    }

    #[tokio::test]
    async fn test_report_markdown_dry_run() {
        let md = report(true).await.to_markdown();
        assert!(md.starts_with("# Inbox Summary (DRY RUN)"));
        assert!(md.contains("_Not summarized (dry run)._"));
        assert!(!md.contains("## Errors"));
        assert!(md.contains("without the `--dry-run` flag"));
    }

    #[tokio::test]
    async fn test_report_save() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reports").join("summary.md");
        let report = report(false).await;
        report.save(&path).await.unwrap();
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, report.to_markdown());
    }
}
