//! Sources of email threads

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, SummaryError};
use crate::models::{Headers, Message, Thread};

/// Trait defining where threads come from, for easier testing
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Fetch up to `limit` threads (all of them when `None`)
    async fn fetch_threads(&self, limit: Option<usize>) -> Result<Vec<Thread>>;

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

/// Thread as exported to JSON
#[derive(Debug, Deserialize)]
struct ThreadRecord {
    id: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    messages: Vec<MessageRecord>,
}

#[derive(Debug, Deserialize)]
struct MessageRecord {
    #[serde(default)]
    id: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    headers: Headers,
    /// Provider timestamp in ms, exported either as a number or a string
    #[serde(default)]
    internal_date: Option<serde_json::Value>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    label_ids: Vec<String>,
}

impl MessageRecord {
    fn into_message(self) -> Message {
        let date_header = self
            .date
            .clone()
            .or_else(|| self.headers.get("date").map(str::to_string));
        let timestamp = self
            .internal_date
            .as_ref()
            .and_then(parse_internal_date)
            .or_else(|| date_header.as_deref().and_then(parse_date_header));

        let mut headers = self.headers;
        if let Some(date) = date_header {
            if headers.get("date").is_none() {
                headers.insert("Date", date);
            }
        }

        Message {
            id: self.id,
            sender: self.from,
            recipients: self
                .to
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            subject: self.subject,
            body: self.body,
            headers,
            timestamp,
            labels: self.label_ids,
        }
    }
}

fn parse_internal_date(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse an RFC 2822 or RFC 3339 date into ms since epoch
pub fn parse_date_header(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    // Drop a trailing comment such as "(UTC)"
    let without_comment = match trimmed.rfind(" (") {
        Some(pos) if trimmed.ends_with(')') => &trimmed[..pos],
        _ => trimmed,
    };

    DateTime::parse_from_rfc2822(without_comment)
        .or_else(|_| DateTime::parse_from_rfc3339(without_comment))
        .map(|dt| dt.timestamp_millis())
        .ok()
}

/// Reads an exported JSON array of thread records
#[derive(Debug, Clone)]
pub struct JsonMailSource {
    path: PathBuf,
}

impl JsonMailSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse thread records; records that cannot form a thread are skipped
    pub fn parse(json: &str, limit: Option<usize>) -> Result<Vec<Thread>> {
        let records: Vec<ThreadRecord> = serde_json::from_str(json).map_err(|e| {
            SummaryError::MailSourceError(format!("Failed to parse thread export: {}", e))
        })?;

        let mut threads = Vec::with_capacity(records.len());
        for record in records {
            if limit.is_some_and(|max| threads.len() >= max) {
                break;
            }
            let messages = record
                .messages
                .into_iter()
                .map(MessageRecord::into_message)
                .collect();
            match Thread::new(record.id, messages, record.labels) {
                Ok(thread) => threads.push(thread),
                Err(e) => warn!("Skipping thread record: {}", e),
            }
        }
        Ok(threads)
    }
}

#[async_trait]
impl MailSource for JsonMailSource {
    async fn fetch_threads(&self, limit: Option<usize>) -> Result<Vec<Thread>> {
        debug!("Reading threads from {:?}", self.path);
        let json = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SummaryError::MailSourceError(format!(
                "Failed to read thread export {:?}: {}",
                self.path, e
            ))
        })?;

        let threads = Self::parse(&json, limit)?;
        info!("Loaded {} threads from {:?}", threads.len(), self.path);
        Ok(threads)
    }

    fn describe(&self) -> String {
        format!("JSON export {}", self.path.display())
    }
}
