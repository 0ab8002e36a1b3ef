//! Ordered, first-match-wins thread categorization

use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::error::{Result, SummaryError};
use crate::matcher::{matches_labels, LabelExpression};
use crate::models::Thread;

/// Name of the category appended when the configured rules have no catch-all
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

/// Prompt used by the implicit default category
pub const DEFAULT_PROMPT: &str = "Provide a brief summary of this email thread.";

/// A named category with its label expressions and summarization prompt
#[derive(Debug, Clone)]
pub struct CategoryRule {
    name: String,
    expressions: Vec<LabelExpression>,
    prompt: String,
}

impl CategoryRule {
    pub fn new<I, S>(name: impl Into<String>, labels: I, prompt: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            expressions: labels
                .into_iter()
                .map(|l| LabelExpression::parse(l.as_ref()))
                .collect(),
            prompt: prompt.into(),
        }
    }

    /// Rule that matches every thread
    pub fn catch_all(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(name, Vec::<String>::new(), prompt)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn expressions(&self) -> &[LabelExpression] {
        &self.expressions
    }

    pub fn is_catch_all(&self) -> bool {
        self.expressions.is_empty()
    }

    pub fn matches(&self, thread: &Thread) -> bool {
        self.is_catch_all() || matches_labels(thread.labels(), &self.expressions)
    }
}

/// Validated, ordered rule list that always ends in a catch-all
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<CategoryRule>,
}

impl RuleSet {
    /// Validate `rules` and append the implicit default category if none of
    /// them is a catch-all
    pub fn new(mut rules: Vec<CategoryRule>) -> Result<Self> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if rule.name.trim().is_empty() {
                return Err(SummaryError::ConfigError(
                    "category name cannot be empty".to_string(),
                ));
            }
            if rule.prompt.trim().is_empty() {
                return Err(SummaryError::ConfigError(format!(
                    "category '{}' has an empty summary prompt",
                    rule.name
                )));
            }
            if !seen.insert(rule.name.as_str()) {
                return Err(SummaryError::ConfigError(format!(
                    "category names must be unique, '{}' appears more than once",
                    rule.name
                )));
            }
        }

        if let Some(pos) = rules.iter().position(CategoryRule::is_catch_all) {
            for shadowed in &rules[pos + 1..] {
                warn!(
                    "Category '{}' can never match: catch-all category '{}' comes before it",
                    shadowed.name, rules[pos].name
                );
            }
        } else {
            if seen.contains(DEFAULT_CATEGORY) {
                return Err(SummaryError::ConfigError(format!(
                    "category name '{}' is reserved for threads no rule matches; \
                     give it an empty label list or rename it",
                    DEFAULT_CATEGORY
                )));
            }
            rules.push(CategoryRule::catch_all(DEFAULT_CATEGORY, DEFAULT_PROMPT));
        }

        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&CategoryRule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Index of the first rule matching the thread
    pub fn first_match(&self, thread: &Thread) -> usize {
        self.rules
            .iter()
            .position(|rule| rule.matches(thread))
            // The last rule is always a catch-all
            .unwrap_or(self.rules.len() - 1)
    }
}

/// Evaluate `rules` against a thread and return (category name, prompt)
pub fn categorize<'r>(thread: &Thread, rules: &'r RuleSet) -> (&'r str, &'r str) {
    let rule = &rules.rules()[rules.first_match(thread)];
    (rule.name(), rule.prompt())
}

/// Case-insensitive sender patterns used to flag important threads
#[derive(Debug, Clone, Default)]
pub struct ImportantSenders {
    patterns: Vec<Regex>,
}

impl ImportantSenders {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                RegexBuilder::new(p.as_ref())
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        SummaryError::ConfigError(format!(
                            "Invalid important sender pattern '{}': {}",
                            p.as_ref(),
                            e
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches_sender(&self, sender: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(sender))
    }

    /// True if any message in the thread comes from an important sender
    pub fn has_important_sender(&self, thread: &Thread) -> bool {
        thread
            .messages()
            .iter()
            .any(|m| self.matches_sender(&m.sender))
    }
}

/// Assigns every thread exactly one category
#[derive(Debug, Clone)]
pub struct Categorizer {
    rules: RuleSet,
    important_senders: ImportantSenders,
}

impl Categorizer {
    pub fn new(rules: RuleSet, important_senders: ImportantSenders) -> Self {
        Self {
            rules,
            important_senders,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// The rule this thread falls into
    pub fn categorize(&self, thread: &Thread) -> &CategoryRule {
        let index = self.rules.first_match(thread);
        let rule = &self.rules.rules()[index];
        debug!(
            "Thread {} ('{}') matched category '{}'",
            thread.id(),
            thread.subject(),
            rule.name()
        );
        rule
    }

    /// Position of the matched rule in evaluation order
    pub fn categorize_index(&self, thread: &Thread) -> usize {
        self.rules.first_match(thread)
    }

    pub fn has_important_sender(&self, thread: &Thread) -> bool {
        self.important_senders.has_important_sender(thread)
    }
}
