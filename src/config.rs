use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheStore;
use crate::categorizer::{Categorizer, CategoryRule, ImportantSenders, RuleSet, DEFAULT_PROMPT};
use crate::dispatcher::{MAX_CONCURRENCY, MAX_TIMEOUT_SECS, MIN_CONCURRENCY, MIN_TIMEOUT_SECS};
use crate::error::{Result, SummaryError};
use crate::pipeline::MAX_THREADS_PER_CATEGORY_LIMIT;

/// Name of the single category used when none are configured
pub const FALLBACK_CATEGORY: &str = "Everything";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_output_file")]
    pub output_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_threads_per_category: Option<usize>,
    #[serde(default)]
    pub important_senders: Vec<String>,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_file: default_output_file(),
            max_threads_per_category: None,
            important_senders: Vec::new(),
            backend: BackendConfig::default(),
            cache: CacheConfig::default(),
            categories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    #[serde(default = "default_cli_path")]
    pub cli_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            cli_path: default_cli_path(),
            model: None,
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            dir: None,
            max_age_days: default_max_age_days(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryConfig {
    pub name: String,
    pub summary_prompt: String,
    /// Label expressions; empty means the category catches every thread
    #[serde(default)]
    pub labels: Vec<String>,
}

fn default_output_file() -> String {
    "inbox_summary.md".to_string()
}

fn default_cli_path() -> String {
    "claude".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_concurrency() -> usize {
    5
}

fn default_cache_enabled() -> bool {
    true
}

fn default_max_age_days() -> u32 {
    30
}

const EXAMPLE_CONFIG: &str = r#"# gmail-summary configuration

# Markdown report written by `gmail-summary run`
output_file = "inbox_summary.md"

# Keep only the most recent N threads of each category (1-1000)
# max_threads_per_category = 50

# Threads from these senders are flagged and listed first (case-insensitive regex)
important_senders = [
    "boss@company\\.com",
]

[backend]
# Claude Code CLI executable
cli_path = "claude"
# model = "sonnet"
# Seconds before a single summary is abandoned (1-600)
timeout_secs = 30
# Summaries generated in parallel (1-20)
concurrency = 5

[cache]
enabled = true
# dir = "/path/to/cache"
# Entries older than this are removed after each run
max_age_days = 30

# Categories are evaluated in order; the first match wins.
# Labels accept exact names, Gmail aliases such as "is:important" and
# wildcards such as "github-*". A category without labels catches everything.

[[categories]]
name = "Important Messages"
summary_prompt = "Summarize this important email thread, highlighting key action items and decisions."
labels = ["is:important", "is:starred"]

[[categories]]
name = "Code Reviews"
summary_prompt = "Summarize this code review thread, noting merge status, feedback, and any blocking issues."
labels = ["github", "github-*", "gitlab"]

[[categories]]
name = "Mailing Lists"
summary_prompt = "Summarize this mailing list discussion, highlighting main topics and conclusions."
labels = ["List/*"]

[[categories]]
name = "Everything Else"
summary_prompt = "Provide a brief summary of this email thread."
labels = []
"#;

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SummaryError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config = Self::from_toml(&content)?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| SummaryError::ConfigError(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SummaryError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| SummaryError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| SummaryError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.output_file.trim().is_empty() {
            return Err(SummaryError::ConfigError(
                "output_file cannot be empty".to_string(),
            ));
        }

        if let Some(max) = self.max_threads_per_category {
            if max == 0 || max > MAX_THREADS_PER_CATEGORY_LIMIT {
                return Err(SummaryError::ConfigError(format!(
                    "max_threads_per_category must be between 1 and {}",
                    MAX_THREADS_PER_CATEGORY_LIMIT
                )));
            }
        }

        for pattern in &self.important_senders {
            if let Err(e) = RegexBuilder::new(pattern).case_insensitive(true).build() {
                return Err(SummaryError::ConfigError(format!(
                    "Invalid regex pattern in important_senders: '{}': {}",
                    pattern, e
                )));
            }
        }

        // Validate backend config
        if self.backend.cli_path.trim().is_empty() {
            return Err(SummaryError::ConfigError(
                "backend.cli_path cannot be empty".to_string(),
            ));
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.backend.timeout_secs) {
            return Err(SummaryError::ConfigError(format!(
                "backend.timeout_secs must be between {} and {}",
                MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS
            )));
        }
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.backend.concurrency) {
            return Err(SummaryError::ConfigError(format!(
                "backend.concurrency must be between {} and {}",
                MIN_CONCURRENCY, MAX_CONCURRENCY
            )));
        }

        // Validate cache config
        if self.cache.max_age_days == 0 {
            return Err(SummaryError::ConfigError(
                "cache.max_age_days must be at least 1".to_string(),
            ));
        }

        // Validate categories
        let mut names = HashSet::new();
        for category in &self.categories {
            if category.name.trim().is_empty() {
                return Err(SummaryError::ConfigError(
                    "Category name cannot be empty".to_string(),
                ));
            }
            if category.summary_prompt.trim().is_empty() {
                return Err(SummaryError::ConfigError(format!(
                    "Summary prompt for category '{}' cannot be empty",
                    category.name
                )));
            }
            if !names.insert(category.name.as_str()) {
                return Err(SummaryError::ConfigError(format!(
                    "Category names must be unique, '{}' appears more than once",
                    category.name
                )));
            }
            if category.labels.iter().any(|l| l.trim().is_empty()) {
                return Err(SummaryError::ConfigError(format!(
                    "Category '{}' has an empty label expression",
                    category.name
                )));
            }
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Ordered rules; no configured categories means one catch-all
    pub fn rule_set(&self) -> Result<RuleSet> {
        let rules = if self.categories.is_empty() {
            vec![CategoryRule::catch_all(FALLBACK_CATEGORY, DEFAULT_PROMPT)]
        } else {
            self.categories
                .iter()
                .map(|c| CategoryRule::new(&c.name, &c.labels, &c.summary_prompt))
                .collect()
        };
        RuleSet::new(rules)
    }

    pub fn important_senders(&self) -> Result<ImportantSenders> {
        ImportantSenders::new(&self.important_senders)
    }

    pub fn categorizer(&self) -> Result<Categorizer> {
        Ok(Categorizer::new(self.rule_set()?, self.important_senders()?))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs)
    }

    /// Configured cache directory or the platform default
    pub fn cache_dir(&self) -> PathBuf {
        self.cache.dir.clone().unwrap_or_else(CacheStore::default_dir)
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SummaryError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }
        tokio::fs::write(path, EXAMPLE_CONFIG)
            .await
            .map_err(|e| SummaryError::ConfigError(format!("Failed to write config file: {}", e)))?;
        tracing::info!("Wrote example configuration to {:?}", path);
        Ok(())
    }
}
