//! Summarization backends
//!
//! A backend turns prepared thread content plus a category prompt into summary
//! text. The production backend drives the `claude` CLI as a child process;
//! tests substitute in-process fakes through the [`SummaryBackend`] trait.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Result, SummaryError};
use crate::models::Thread;

/// Longest message body included in prepared content, in characters
pub const MAX_BODY_CHARS: usize = 2000;

/// Content budget handed to the backend, in estimated tokens
pub const MAX_CONTENT_TOKENS: usize = 8000;

const CHARS_PER_TOKEN: usize = 4;
const TRUNCATION_MARGIN: usize = 100;
const TRUNCATION_NOTICE: &str = "\n\n[Content truncated due to length...]";
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Trait defining a summarization backend for easier testing
#[async_trait]
pub trait SummaryBackend: Send + Sync {
    /// Summarize prepared thread content using `prompt`, giving up after
    /// `timeout`
    async fn summarize(&self, content: &str, prompt: &str, timeout: Duration) -> Result<String>;

    /// Identifier of the model configuration; part of every cache key
    fn model_id(&self) -> &str;

    /// Probe the backend, returning a version or status string
    async fn health_check(&self) -> Result<String>;
}

/// Render a thread as plain text for the backend
pub fn prepare_thread_content(thread: &Thread) -> String {
    let mut parts = vec![
        format!("Subject: {}", thread.subject()),
        format!("Participants: {}", thread.participants().join(", ")),
        format!("Total Messages: {}", thread.message_count()),
        String::new(),
        "Thread Messages:".to_string(),
        "=".repeat(50),
    ];

    for (i, message) in thread.messages().iter().enumerate() {
        let from = if message.sender.trim().is_empty() {
            "Unknown"
        } else {
            message.sender.as_str()
        };
        let date = message
            .headers
            .get("date")
            .map(str::to_string)
            .or_else(|| {
                message
                    .timestamp
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                    .map(|dt| dt.to_rfc2822())
            })
            .unwrap_or_else(|| "Unknown date".to_string());

        parts.push(format!("\nMessage {}:", i + 1));
        parts.push(format!("From: {}", from));
        parts.push(format!("Date: {}", date));
        parts.push(format!("Content: {}", truncate_body(message.body.trim())));
        parts.push("-".repeat(30));
    }

    parts.join("\n")
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_BODY_CHARS {
        return body.to_string();
    }
    let kept: String = body.chars().take(MAX_BODY_CHARS - 3).collect();
    format!("{}...", kept)
}

/// Rough token estimate used for the content budget
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// Shorten content that exceeds `max_tokens`, preferring to cut at a message
/// boundary in the second half of the budget
pub fn truncate_content_if_needed(content: &str, max_tokens: usize) -> String {
    if estimate_tokens(content) <= max_tokens {
        return content.to_string();
    }

    let char_limit = max_tokens * CHARS_PER_TOKEN;
    let keep = char_limit.saturating_sub(TRUNCATION_MARGIN);
    let byte_end = content
        .char_indices()
        .nth(keep)
        .map(|(i, _)| i)
        .unwrap_or(content.len());
    let mut truncated = &content[..byte_end];

    if let Some(boundary) = truncated.rfind("\nMessage ") {
        if truncated[..boundary].chars().count() > char_limit / 2 {
            truncated = &truncated[..boundary];
        }
    }

    format!("{}{}", truncated, TRUNCATION_NOTICE)
}

/// Full prompt text sent to the CLI on stdin
pub fn build_prompt(prompt: &str, content: &str) -> String {
    format!("{}\n\nThread content:\n{}", prompt, content)
}

/// Backend that shells out to the `claude` CLI in print mode
#[derive(Debug, Clone)]
pub struct ClaudeCliBackend {
    cli_path: String,
    model: Option<String>,
    model_id: String,
}

impl ClaudeCliBackend {
    pub fn new(cli_path: impl Into<String>, model: Option<String>) -> Self {
        let cli_path = cli_path.into();
        let model_id = match &model {
            Some(model) => format!("claude-cli:{}", model),
            None => "claude-cli".to_string(),
        };
        Self {
            cli_path,
            model,
            model_id,
        }
    }

    pub fn cli_path(&self) -> &str {
        &self.cli_path
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.cli_path);
        command.arg("--print");
        if let Some(model) = &self.model {
            command.args(["--model", model]);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    fn spawn_error(&self, e: std::io::Error) -> SummaryError {
        if e.kind() == std::io::ErrorKind::NotFound {
            SummaryError::BackendNotFound(format!(
                "Claude CLI not found at '{}'. Please install Claude Code CLI.",
                self.cli_path
            ))
        } else {
            SummaryError::BackendError(format!("Failed to start Claude CLI: {}", e))
        }
    }
}

#[async_trait]
impl SummaryBackend for ClaudeCliBackend {
    async fn summarize(&self, content: &str, prompt: &str, timeout: Duration) -> Result<String> {
        let input = build_prompt(prompt, content).into_bytes();
        let mut child = self.command().spawn().map_err(|e| self.spawn_error(e))?;
        let mut stdin = child.stdin.take().ok_or_else(|| {
            SummaryError::BackendError("Claude CLI stdin was not captured".to_string())
        })?;

        let feed = async move {
            let result = stdin.write_all(&input).await;
            // Closing stdin tells the CLI the prompt is complete
            drop(stdin);
            result
        };

        // Dropping the child on timeout kills the process
        let output = match tokio::time::timeout(timeout, async {
            let (written, output) = tokio::join!(feed, child.wait_with_output());
            if let Err(e) = written {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e);
                }
                debug!("Claude CLI closed stdin early");
            }
            output
        })
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(SummaryError::BackendError(format!(
                    "Claude CLI execution failed: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(SummaryError::BackendTimeout {
                    seconds: timeout.as_secs(),
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            return Err(SummaryError::BackendError(format!(
                "Claude CLI failed ({}): {}",
                output.status,
                if detail.is_empty() { "Unknown error" } else { detail }
            )));
        }

        let summary = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if summary.is_empty() {
            return Err(SummaryError::BackendError(
                "Claude CLI returned empty response".to_string(),
            ));
        }
        Ok(summary)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn health_check(&self) -> Result<String> {
        let mut command = Command::new(&self.cli_path);
        command
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = command.spawn().map_err(|e| self.spawn_error(e))?;

        let output = tokio::time::timeout(HEALTH_CHECK_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| SummaryError::BackendTimeout {
                seconds: HEALTH_CHECK_TIMEOUT.as_secs(),
            })?
            .map_err(|e| SummaryError::BackendError(format!("Claude CLI execution failed: {}", e)))?;

        if !output.status.success() {
            return Err(SummaryError::BackendError(format!(
                "Claude CLI --version failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Claude CLI version: {}", version);
        Ok(version)
    }
}
