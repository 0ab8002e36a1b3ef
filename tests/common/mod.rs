//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use gmail_summary::backend::SummaryBackend;
use gmail_summary::categorizer::{Categorizer, CategoryRule, ImportantSenders, RuleSet};
use gmail_summary::error::{Result, SummaryError};
use gmail_summary::mail_source::MailSource;
use gmail_summary::models::{Headers, Message, Thread};
use mockall::mock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Create a test message with default values
pub fn create_test_message(id: &str, sender: &str, body: &str, timestamp: i64) -> Message {
    Message {
        id: id.to_string(),
        sender: sender.to_string(),
        recipients: vec!["me@example.com".to_string()],
        subject: format!("Subject of {}", id),
        body: body.to_string(),
        headers: Headers::from_pairs([("Message-ID", format!("<{}@example.com>", id))]),
        timestamp: Some(timestamp),
        labels: vec![],
    }
}

/// Create a single-message thread with the given labels
pub fn create_test_thread(id: &str, labels: &[&str], timestamp: i64) -> Thread {
    create_thread_from(id, labels, timestamp, "alice@example.com")
}

/// Create a single-message thread from a specific sender
pub fn create_thread_from(id: &str, labels: &[&str], timestamp: i64, sender: &str) -> Thread {
    let message = create_test_message(
        &format!("{}-m1", id),
        sender,
        &format!("Body of thread {}", id),
        timestamp,
    );
    Thread::new(id, vec![message], labels.iter().copied()).unwrap()
}

/// Rules used across scenarios: Important, Code, General (catch-all)
pub fn create_test_rules() -> RuleSet {
    RuleSet::new(vec![
        CategoryRule::new("Important", ["is:important"], "Summarize the action items."),
        CategoryRule::new("Code", ["github"], "Summarize the code review."),
        CategoryRule::catch_all("General", "Provide a brief summary."),
    ])
    .unwrap()
}

pub fn create_test_categorizer() -> Categorizer {
    Categorizer::new(create_test_rules(), ImportantSenders::default())
}

/// Backend double that records calls and in-flight concurrency
pub struct FakeBackend {
    model: String,
    delay: Duration,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            model: "fake-model".to_string(),
            delay: Duration::ZERO,
            failing: HashSet::new(),
            panicking: HashSet::new(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail any content that mentions `thread_id`'s body
    pub fn failing_for(mut self, thread_id: &str) -> Self {
        self.failing.insert(format!("Body of thread {}", thread_id));
        self
    }

    /// Panic on any content that mentions `thread_id`'s body
    pub fn panicking_for(mut self, thread_id: &str) -> Self {
        self.panicking.insert(format!("Body of thread {}", thread_id));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SummaryBackend for FakeBackend {
    async fn summarize(&self, content: &str, prompt: &str, _timeout: Duration) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.iter().any(|marker| content.contains(marker.as_str())) {
            panic!("backend crashed on {}", prompt);
        }

        if self.failing.iter().any(|marker| content.contains(marker.as_str())) {
            return Err(SummaryError::BackendError("model refused".to_string()));
        }
        Ok(format!("{} chars summarized", content.len()))
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<String> {
        Ok("fake 1.0".to_string())
    }
}

// Mock implementation of MailSource for testing
mock! {
    pub MailSource {}

    #[async_trait::async_trait]
    impl MailSource for MailSource {
        async fn fetch_threads(&self, limit: Option<usize>) -> Result<Vec<Thread>>;
        fn describe(&self) -> String;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_thread() {
        let thread = create_test_thread("t1", &["INBOX"], 42);
        assert_eq!(thread.id(), "t1");
        assert!(thread.labels().contains("INBOX"));
        assert_eq!(thread.most_recent_timestamp(), 42);
    }

    #[test]
    fn test_create_test_rules() {
        let rules = create_test_rules();
        assert_eq!(rules.len(), 3);
        assert!(rules.get("General").unwrap().is_catch_all());
    }
}
