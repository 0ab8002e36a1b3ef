use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, SummaryError};

/// Subject used when a thread has no messages or the first message has none
pub const NO_SUBJECT: &str = "No Subject";

const GMAIL_WEB_BASE: &str = "https://mail.google.com/mail/u/0/";

/// Message headers with case-insensitive, unique keys
///
/// Keys are stored lower-cased; when two incoming keys differ only by case
/// the later one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut headers = Self::new();
        for (name, value) in pairs {
            headers.insert(name.as_ref(), value);
        }
        headers
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Header pairs in key order (keys lower-cased)
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, String>> for Headers {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self::from_pairs(map)
    }
}

impl From<Headers> for BTreeMap<String, String> {
    fn from(headers: Headers) -> Self {
        headers.0
    }
}

/// A single email inside a thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub headers: Headers,
    /// Milliseconds since epoch, when the source could determine one
    pub timestamp: Option<i64>,
    pub labels: Vec<String>,
}

/// An immutable, provider-grouped sequence of messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Thread {
    id: String,
    messages: Vec<Message>,
    labels: BTreeSet<String>,
    most_recent_timestamp: i64,
}

impl Thread {
    /// Build a thread; the label set is the union of `labels` and every
    /// message's own labels
    pub fn new<I, S>(id: impl Into<String>, messages: Vec<Message>, labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(SummaryError::InvalidThread(
                "thread id cannot be empty".to_string(),
            ));
        }

        let mut label_set: BTreeSet<String> = labels.into_iter().map(Into::into).collect();
        for message in &messages {
            label_set.extend(message.labels.iter().cloned());
        }

        let most_recent_timestamp = messages
            .iter()
            .filter_map(|m| m.timestamp)
            .max()
            .unwrap_or(0);

        Ok(Self {
            id,
            messages,
            labels: label_set,
            most_recent_timestamp,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    /// Sort key: newest message timestamp in ms, 0 when unknown
    pub fn most_recent_timestamp(&self) -> i64 {
        self.most_recent_timestamp
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn subject(&self) -> &str {
        self.messages
            .first()
            .map(|m| m.subject.as_str())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(NO_SUBJECT)
    }

    /// Unique senders and recipients, sorted
    pub fn participants(&self) -> Vec<String> {
        let mut participants = BTreeSet::new();
        for message in &self.messages {
            if !message.sender.trim().is_empty() {
                participants.insert(message.sender.trim().to_string());
            }
            for recipient in &message.recipients {
                for addr in recipient.split(',') {
                    let addr = addr.trim();
                    if !addr.is_empty() {
                        participants.insert(addr.to_string());
                    }
                }
            }
        }
        participants.into_iter().collect()
    }

    /// Gmail web link for the thread
    ///
    /// Prefers a Message-ID search, falls back to a subject search and then
    /// to the inbox.
    pub fn web_url(&self) -> String {
        if let Some(message_id) = self.messages.first().and_then(|m| m.headers.get("message-id")) {
            let clean = message_id.trim().trim_matches(|c| c == '<' || c == '>');
            if !clean.is_empty() {
                return format!(
                    "{}#search/rfc822msgid%3A{}",
                    GMAIL_WEB_BASE,
                    percent_encode(clean)
                );
            }
        }

        let subject = self.subject();
        if subject != NO_SUBJECT {
            let mut clean = subject;
            for prefix in ["Re:", "RE:", "Fwd:", "FWD:"] {
                if let Some(rest) = clean.strip_prefix(prefix) {
                    clean = rest.trim();
                }
            }
            return format!(
                "{}#search/subject%3A({})",
                GMAIL_WEB_BASE,
                percent_encode(clean)
            );
        }

        format!("{}#inbox", GMAIL_WEB_BASE)
    }
}

fn percent_encode(value: &str) -> String {
    // byte_serialize uses '+' for spaces; a literal '+' is already %2B
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Terminal state of one thread's summarization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SummaryStatus {
    Success,
    Failed,
    Skipped,
}

/// Where a summary came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SummarySource {
    Cache,
    Backend,
}

/// Outcome of summarizing one thread in one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResult {
    thread_id: String,
    category: String,
    status: SummaryStatus,
    summary: Option<String>,
    error: Option<String>,
    source: Option<SummarySource>,
}

impl SummaryResult {
    pub fn success(
        thread_id: impl Into<String>,
        category: impl Into<String>,
        summary: impl Into<String>,
        source: SummarySource,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            category: category.into(),
            status: SummaryStatus::Success,
            summary: Some(summary.into()),
            error: None,
            source: Some(source),
        }
    }

    pub fn failed(
        thread_id: impl Into<String>,
        category: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            category: category.into(),
            status: SummaryStatus::Failed,
            summary: None,
            error: Some(error.into()),
            source: Some(SummarySource::Backend),
        }
    }

    pub fn skipped(
        thread_id: impl Into<String>,
        category: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            category: category.into(),
            status: SummaryStatus::Skipped,
            summary: None,
            error: Some(reason.into()),
            source: None,
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn status(&self) -> SummaryStatus {
        self.status
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Error detail for failed results, reason for skipped ones
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn source(&self) -> Option<SummarySource> {
        self.source
    }

    pub fn is_success(&self) -> bool {
        self.status == SummaryStatus::Success
    }
}

/// Per-category counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub name: String,
    pub threads: usize,
    pub messages: usize,
    pub important: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Aggregate statistics for one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub from_cache: usize,
    /// Failure detail and how many threads failed with it
    pub error_types: BTreeMap<String, usize>,
    pub categories: Vec<CategoryStats>,
}

impl RunStats {
    /// Record one result against the totals
    pub fn record(&mut self, result: &SummaryResult) {
        self.total += 1;
        match result.status() {
            SummaryStatus::Success => {
                self.successful += 1;
                if result.source() == Some(SummarySource::Cache) {
                    self.from_cache += 1;
                }
            }
            SummaryStatus::Failed => {
                self.failed += 1;
                let detail = result.error().unwrap_or("Unknown error").to_string();
                *self.error_types.entry(detail).or_insert(0) += 1;
            }
            SummaryStatus::Skipped => self.skipped += 1,
        }
    }

    /// Percentage of attempted threads that produced a summary
    pub fn success_rate(&self) -> f64 {
        let attempted = self.successful + self.failed;
        if attempted == 0 {
            return 0.0;
        }
        self.successful as f64 / attempted as f64 * 100.0
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, subject: &str, ts: Option<i64>) -> Message {
        Message {
            id: id.to_string(),
            sender: "alice@example.com".to_string(),
            recipients: vec!["bob@example.com, carol@example.com".to_string()],
            subject: subject.to_string(),
            body: "Hello".to_string(),
            headers: Headers::new(),
            timestamp: ts,
            labels: vec!["INBOX".to_string()],
        }
    }

    #[test]
    fn test_headers_case_insensitive() {
        let headers = Headers::from_pairs([("Message-ID", "<a@b>"), ("List-Id", "x")]);
        assert_eq!(headers.get("message-id"), Some("<a@b>"));
        assert_eq!(headers.get("MESSAGE-ID"), Some("<a@b>"));
        assert_eq!(headers.len(), 2);

        let headers = Headers::from_pairs([("Subject", "one"), ("SUBJECT", "two")]);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("subject"), Some("two"));
    }

    #[test]
    fn test_headers_deserialize_normalizes_keys() {
        let headers: Headers = serde_json::from_str(r#"{"From": "a@b.c", "X-Mailer": "m"}"#).unwrap();
        assert_eq!(headers.get("from"), Some("a@b.c"));
        let keys: Vec<&str> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["from", "x-mailer"]);
    }

    #[test]
    fn test_thread_requires_id() {
        let result = Thread::new("  ", vec![], Vec::<String>::new());
        assert!(matches!(result, Err(SummaryError::InvalidThread(_))));
    }

    #[test]
    fn test_thread_most_recent_timestamp() {
        let thread = Thread::new(
            "t1",
            vec![
                message("m1", "Hi", Some(100)),
                message("m2", "Re: Hi", Some(300)),
                message("m3", "Re: Hi", None),
            ],
            vec!["github"],
        )
        .unwrap();
        assert_eq!(thread.most_recent_timestamp(), 300);

        let empty = Thread::new("t2", vec![message("m1", "Hi", None)], Vec::<String>::new()).unwrap();
        assert_eq!(empty.most_recent_timestamp(), 0);
    }

    #[test]
    fn test_thread_labels_union_messages() {
        let mut m = message("m1", "Hi", Some(1));
        m.labels = vec!["IMPORTANT".to_string()];
        let thread = Thread::new("t1", vec![m], vec!["github"]).unwrap();
        assert!(thread.labels().contains("IMPORTANT"));
        assert!(thread.labels().contains("github"));
    }

    #[test]
    fn test_thread_subject_and_participants() {
        let thread = Thread::new("t1", vec![message("m1", "Launch plan", Some(1))], Vec::<String>::new()).unwrap();
        assert_eq!(thread.subject(), "Launch plan");
        assert_eq!(
            thread.participants(),
            vec![
                "alice@example.com".to_string(),
                "bob@example.com".to_string(),
                "carol@example.com".to_string()
            ]
        );

        let no_messages = Thread::new("t2", vec![], Vec::<String>::new()).unwrap();
        assert_eq!(no_messages.subject(), NO_SUBJECT);
    }

    #[test]
    fn test_web_url_prefers_message_id() {
        let mut m = message("m1", "Hello world", Some(1));
        m.headers.insert("Message-ID", "<abc/123@mail.example.com>");
        let thread = Thread::new("t1", vec![m], Vec::<String>::new()).unwrap();
        assert_eq!(
            thread.web_url(),
            "https://mail.google.com/mail/u/0/#search/rfc822msgid%3Aabc%2F123%40mail.example.com"
        );
    }

    #[test]
    fn test_web_url_subject_fallback() {
        let thread = Thread::new("t1", vec![message("m1", "Re: Status update", Some(1))], Vec::<String>::new()).unwrap();
        assert_eq!(
            thread.web_url(),
            "https://mail.google.com/mail/u/0/#search/subject%3A(Status%20update)"
        );

        let empty = Thread::new("t2", vec![], Vec::<String>::new()).unwrap();
        assert_eq!(empty.web_url(), "https://mail.google.com/mail/u/0/#inbox");
    }

    #[test]
    fn test_summary_result_constructors() {
        let ok = SummaryResult::success("t1", "Code", "All good", SummarySource::Cache);
        assert!(ok.is_success());
        assert_eq!(ok.summary(), Some("All good"));
        assert_eq!(ok.source(), Some(SummarySource::Cache));
        assert_eq!(ok.error(), None);

        let failed = SummaryResult::failed("t2", "Code", "timed out");
        assert_eq!(failed.status(), SummaryStatus::Failed);
        assert_eq!(failed.summary(), None);
        assert_eq!(failed.error(), Some("timed out"));

        let skipped = SummaryResult::skipped("t3", "General", "dry run");
        assert_eq!(skipped.status(), SummaryStatus::Skipped);
        assert_eq!(skipped.source(), None);
    }

    #[test]
    fn test_run_stats_record() {
        let mut stats = RunStats::default();
        stats.record(&SummaryResult::success("t1", "A", "s", SummarySource::Backend));
        stats.record(&SummaryResult::success("t2", "A", "s", SummarySource::Cache));
        stats.record(&SummaryResult::failed("t3", "A", "timed out"));
        stats.record(&SummaryResult::failed("t4", "B", "timed out"));
        stats.record(&SummaryResult::skipped("t5", "B", "dry run"));

        assert_eq!(stats.total, 5);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.from_cache, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.error_types.get("timed out"), Some(&2));
        assert!((stats.success_rate() - 50.0).abs() < f64::EPSILON);
        assert!(stats.has_failures());
    }

    #[test]
    fn test_success_rate_without_attempts() {
        let mut stats = RunStats::default();
        stats.record(&SummaryResult::skipped("t1", "A", "dry run"));
        assert_eq!(stats.success_rate(), 0.0);
    }
}
