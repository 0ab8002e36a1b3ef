use anyhow::Result;
use clap::Parser;
use gmail_summary::cli::{self, CacheCommand, Cli, Commands};
use gmail_summary::config::Config;
use gmail_summary::error::SummaryError;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log buffer poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log buffer poisoned"))?;
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            // Remove trailing newline for cleaner output
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl MultiProgressMakeWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self { multi }
    }
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        display_error(&e);
        eprintln!("\nFor help, run: gmail-summary --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with level based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_summary=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_summary=info,warn"))
    };

    // Create shared MultiProgress for coordinated progress bar + logging
    let multi_progress = Arc::new(MultiProgress::new());
    let make_writer = MultiProgressMakeWriter::new(Arc::clone(&multi_progress));

    // Set up tracing with MultiProgress writer - logs will print above progress bars
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match &cli.command {
        Commands::Run(args) => {
            tracing::info!("Starting summary run");
            if args.dry_run {
                println!("Running in DRY RUN mode - no summaries will be generated");
            }
            if args.no_cache {
                println!("Running with the summary cache DISABLED");
            }

            let report = cli::run_pipeline(&cli, args, (*multi_progress).clone()).await?;
            let stats = &report.output.stats;

            println!("\n========================================");
            println!("Summary Run");
            println!("========================================");
            println!("Run ID: {}", report.run_id);
            println!("Duration: {} seconds", report.duration_seconds);
            println!("Threads: {}", stats.total);
            for category in stats.categories.iter().filter(|c| c.threads > 0) {
                println!(
                    "  {}: {} threads ({} important)",
                    category.name, category.threads, category.important
                );
            }
            if !report.dry_run {
                println!("Summaries generated: {}", stats.successful - stats.from_cache);
                println!("Summaries from cache: {}", stats.from_cache);
                println!("Failed: {}", stats.failed);
                println!("Success rate: {:.1}%", stats.success_rate());
                for (error, count) in &stats.error_types {
                    println!("  Error: {} ({})", cli::truncate_string(error, 60), count);
                }
            }
            println!("========================================");

            Ok(())
        }

        Commands::Cache { action } => {
            let config = Config::load(&cli.config).await?;
            let cache = cli::open_cache(&config).await;

            match action {
                CacheCommand::Status => {
                    let stats = cache.stats().await;
                    println!("\n========================================");
                    println!("Summary Cache");
                    println!("========================================");
                    if let Some(location) = &stats.location {
                        println!("Location: {}", location.display());
                    }
                    println!("Entries: {}", stats.entries);
                    println!("Size: {:.1} KB", stats.file_size_bytes as f64 / 1024.0);
                    if let Some(oldest) = stats.oldest_entry {
                        println!("Oldest entry: {}", oldest.format("%Y-%m-%d %H:%M:%S"));
                    }
                    if let Some(newest) = stats.newest_entry {
                        println!("Newest entry: {}", newest.format("%Y-%m-%d %H:%M:%S"));
                    }
                    println!("Enabled: {}", config.cache.enabled);
                    println!("========================================");
                }
                CacheCommand::Clear { force } => {
                    let entries = cache.len().await;
                    if !force
                        && !cli::confirm_action(&format!("Remove {} cached summaries?", entries))?
                    {
                        println!("Cache left unchanged.");
                        return Ok(());
                    }
                    cache.clear().await?;
                    println!("Removed {} cached summaries.", entries);
                }
                CacheCommand::Cleanup { max_age } => {
                    if *max_age == 0 {
                        return Err(SummaryError::ConfigError(
                            "--max-age must be at least 1 day".to_string(),
                        )
                        .into());
                    }
                    let removed = cache.cleanup_older_than(*max_age).await?;
                    println!(
                        "Removed {} cached summaries older than {} days.",
                        removed, max_age
                    );
                }
            }

            Ok(())
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            // Check if file exists
            if output.exists() && !force {
                return Err(SummaryError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nPlease edit this file to customize your settings.");
            println!("Key settings to review:");
            println!("  - categories: Ordered rules, first match wins");
            println!("  - important_senders: Regex patterns for senders to highlight");
            println!("  - backend.concurrency / backend.timeout_secs: Summarization limits");
            println!("  - cache.max_age_days: How long summaries are reused");

            Ok(())
        }

        Commands::TestBackend => {
            let config = Config::load(&cli.config).await?;
            println!("Testing backend at '{}'...", config.backend.cli_path);
            let version = cli::test_backend(&config).await?;
            println!("Backend is available: {}", version);
            Ok(())
        }
    }
}

fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    // Display error chain
    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    // Display helpful hints based on error type
    if let Some(summary_err) = error.downcast_ref::<SummaryError>() {
        match summary_err {
            SummaryError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: gmail-summary init-config --force");
            }
            SummaryError::BackendNotFound(_) => {
                eprintln!("\nHint: Install the Claude Code CLI or set backend.cli_path.");
                eprintln!("      Try running: gmail-summary test-backend");
            }
            SummaryError::BackendTimeout { .. } => {
                eprintln!("\nHint: The backend is slow to respond.");
                eprintln!("      Consider raising backend.timeout_secs in config.");
            }
            SummaryError::MailSourceError(_) => {
                eprintln!("\nHint: Check that the --input file exists and holds a JSON array of threads.");
            }
            SummaryError::CacheError(_) => {
                eprintln!("\nHint: The cache directory may not be writable.");
                eprintln!("      Set cache.dir in config or run with --no-cache.");
            }
            _ => {}
        }
    }
}
