//! Content-addressed summary cache
//!
//! Summaries are keyed by a fingerprint of the thread content, the prompt and
//! the model identifier, so any change to one of them is a miss. Entries live
//! in memory behind a read-write lock and are persisted as a single JSON file.
//! `put` only marks the store dirty; `flush` writes a temporary file and
//! renames it over the cache file, and only one write runs at a time.
//!
//! The cache is strictly an optimization: unreadable storage behaves as an
//! empty cache and failed writes are logged, never raised.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, SummaryError};
use crate::models::{Message, Thread};

/// Bumped whenever the canonical fingerprint input changes
pub const FINGERPRINT_VERSION: u32 = 2;

/// On-disk format version of the cache file
const CACHE_FILE_VERSION: u32 = 1;

/// Name of the cache file inside the cache directory
pub const CACHE_FILE_NAME: &str = "summaries.json";

const APP_DIR_NAME: &str = "gmail-summary";

/// Hex-encoded SHA-256 digest identifying one (thread, prompt, model) triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn push_field(buf: &mut Vec<u8>, field: &[u8]) {
    buf.extend_from_slice(&(field.len() as u64).to_le_bytes());
    buf.extend_from_slice(field);
}

/// Canonical bytes of one message: sorted lower-cased headers followed by the
/// body
///
/// Sender, recipients, subject and the timestamp are folded in as
/// `:`-prefixed pseudo-headers, which no real header name can collide with.
/// The timestamp only counts when there is no `Date` header, matching what
/// the backend is shown.
fn message_record(message: &Message) -> Vec<u8> {
    let mut headers: BTreeMap<&str, String> = message
        .headers
        .iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect();
    headers.insert(":from", message.sender.clone());
    headers.insert(":to", message.recipients.join(", "));
    headers.insert(":subject", message.subject.clone());
    if message.headers.get("date").is_none() {
        if let Some(ms) = message.timestamp {
            headers.insert(":timestamp", ms.to_string());
        }
    }

    let mut record = Vec::with_capacity(message.body.len() + 64 * headers.len());
    push_field(&mut record, &(headers.len() as u64).to_le_bytes());
    for (name, value) in &headers {
        push_field(&mut record, name.as_bytes());
        push_field(&mut record, value.as_bytes());
    }
    push_field(&mut record, message.body.as_bytes());
    record
}

/// Deterministic fingerprint of a thread summarized with `prompt` by `model_id`
///
/// Message order does not affect the result; thread id and labels are not
/// part of the content.
pub fn fingerprint(thread: &Thread, prompt: &str, model_id: &str) -> Fingerprint {
    let mut records: Vec<Vec<u8>> = thread.messages().iter().map(message_record).collect();
    records.sort();

    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_VERSION.to_le_bytes());
    hasher.update((records.len() as u64).to_le_bytes());
    for record in &records {
        let mut framed = Vec::with_capacity(record.len() + 8);
        push_field(&mut framed, record);
        hasher.update(&framed);
    }
    let mut tail = Vec::with_capacity(prompt.len() + model_id.len() + 16);
    push_field(&mut tail, prompt.as_bytes());
    push_field(&mut tail, model_id.as_bytes());
    hasher.update(&tail);

    Fingerprint(hex::encode(hasher.finalize()))
}

/// A previously generated summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub summary: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub model_id: String,
}

impl CacheEntry {
    pub fn new(summary: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            generated_at: Utc::now(),
            model_id: model_id.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: HashMap<String, CacheEntry>,
}

/// Snapshot of the cache for the `cache status` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub location: Option<PathBuf>,
    pub file_size_bytes: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Fingerprint-keyed summary store shared by concurrent workers
#[derive(Debug)]
pub struct CacheStore {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<String, CacheEntry>>,
    write_lock: Mutex<()>,
    dirty: AtomicBool,
}

impl CacheStore {
    /// Platform cache directory for this application
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(".cache").join(APP_DIR_NAME))
    }

    /// Open the cache stored in `dir`
    ///
    /// A missing file is an empty cache. An unreadable or corrupt file is
    /// treated the same way, with a warning; it is replaced on the next write.
    pub async fn open(dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join(CACHE_FILE_NAME);
        let entries = load_entries(&path).await;
        info!("Opened summary cache at {:?} ({} entries)", path, entries.len());

        Self {
            path: Some(path),
            entries: RwLock::new(entries),
            write_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Cache that is never persisted
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Path of the backing file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn get(&self, key: &Fingerprint) -> Option<CacheEntry> {
        self.entries.read().await.get(key.as_str()).cloned()
    }

    /// Store an entry; the last writer for a key wins
    ///
    /// The entry is visible to `get` immediately and reaches disk on the next
    /// `flush`.
    pub async fn put(&self, key: &Fingerprint, entry: CacheEntry) {
        self.entries
            .write()
            .await
            .insert(key.as_str().to_string(), entry);
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// True when entries were added since the last write to disk
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Write pending entries to disk; a no-op when nothing changed
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.persist().await {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(SummaryError::CacheError(format!(
                "Failed to write summary cache: {}",
                e
            )));
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove every entry and the backing file
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.entries.write().await.clear();
        self.dirty.store(false, Ordering::SeqCst);

        if let Some(path) = &self.path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => info!("Removed cache file {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(SummaryError::CacheError(format!(
                        "Failed to remove cache file {:?}: {}",
                        path, e
                    )))
                }
            }
        }
        Ok(())
    }

    /// Drop entries generated more than `max_age_days` ago, returning how many
    /// were removed
    pub async fn cleanup_older_than(&self, max_age_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(max_age_days));
        let _guard = self.write_lock.lock().await;

        let removed = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, entry| entry.generated_at >= cutoff);
            before - entries.len()
        };

        if removed > 0 {
            // The write covers pending puts too
            self.dirty.store(false, Ordering::SeqCst);
            self.persist().await.map_err(|e| {
                self.dirty.store(true, Ordering::SeqCst);
                SummaryError::CacheError(format!("Failed to write cleaned cache: {}", e))
            })?;
            info!(
                "Removed {} cache entries older than {} days",
                removed, max_age_days
            );
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let file_size_bytes = match &self.path {
            Some(path) => tokio::fs::metadata(path)
                .await
                .map(|m| m.len())
                .unwrap_or(0),
            None => 0,
        };

        CacheStats {
            entries: entries.len(),
            location: self.path.clone(),
            file_size_bytes,
            oldest_entry: entries.values().map(|e| e.generated_at).min(),
            newest_entry: entries.values().map(|e| e.generated_at).max(),
        }
    }

    /// Write the current entries to disk; callers hold `write_lock`
    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = {
            let entries = self.entries.read().await;
            let file = CacheFileRef {
                version: CACHE_FILE_VERSION,
                entries: &entries,
            };
            serde_json::to_string_pretty(&file)?
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!("Persisted summary cache to {:?}", path);
        Ok(())
    }
}

#[derive(Serialize)]
struct CacheFileRef<'a> {
    version: u32,
    entries: &'a HashMap<String, CacheEntry>,
}

async fn load_entries(path: &Path) -> HashMap<String, CacheEntry> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No cache file at {:?}, starting empty", path);
            return HashMap::new();
        }
        Err(e) => {
            warn!("Cache file {:?} is unreadable ({}); continuing without cached summaries", path, e);
            return HashMap::new();
        }
    };

    match serde_json::from_str::<CacheFile>(&json) {
        Ok(file) if file.version == CACHE_FILE_VERSION => file.entries,
        Ok(file) => {
            warn!(
                "Cache file {:?} has unsupported version {}; ignoring it",
                path, file.version
            );
            HashMap::new()
        }
        Err(e) => {
            warn!("Cache file {:?} is corrupt ({}); ignoring it", path, e);
            HashMap::new()
        }
    }
}
