use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{AnalysisError, AnalysisResult};

pub const RESULTS_PER_PAGE: u32 = 2000;
pub const PUBLICATION_WINDOW_DAYS: i64 = 365;
const DEFAULT_QUERY: &str = "firmware";

/// One persisted feed response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub query: String,
    pub payload: Value,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Validity is decided by the reader, against the reader's clock.
    pub fn is_valid_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let age = (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO);
        age < ttl
    }
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// TTL-bounded, disk-backed cache in front of the CVE feed.
///
/// Each normalized query owns an async mutex, so concurrent callers asking for the
/// same key wait on the first caller's fetch instead of issuing their own.
pub struct VulnerabilityFeedCache {
    client: Client,
    feed_url: String,
    api_key: Option<String>,
    cache_dir: PathBuf,
    ttl: Duration,
    slots: DashMap<String, Slot>,
}

impl VulnerabilityFeedCache {
    pub fn new(
        client: Client,
        feed_url: impl Into<String>,
        api_key: Option<String>,
        cache_dir: impl Into<PathBuf>,
        ttl: Duration,
    ) -> Self {
        Self {
            client,
            feed_url: feed_url.into(),
            api_key,
            cache_dir: cache_dir.into(),
            ttl,
            slots: DashMap::new(),
        }
    }

    pub fn from_config(config: &Config, client: Client) -> Self {
        Self::new(
            client,
            config.feed_url.clone(),
            config.nvd_api_key.clone(),
            config.cache_dir.clone(),
            config.cache_ttl,
        )
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the feed payload for `query`, or `None` when enrichment is unavailable.
    pub async fn fetch(&self, query: &str) -> Option<Value> {
        let key = normalize_query(query);
        let slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());
        let mut guard = slot.lock().await;
        let now = Utc::now();

        if let Some(entry) = guard.as_ref().filter(|e| e.is_valid_at(now, self.ttl)) {
            tracing::debug!("Feed cache hit (memory) for '{}'", key);
            return Some(entry.payload.clone());
        }

        if let Some(entry) = self.read_entry(&key).await.filter(|e| e.is_valid_at(now, self.ttl)) {
            tracing::debug!("Feed cache hit (disk) for '{}'", key);
            let payload = entry.payload.clone();
            *guard = Some(entry);
            return Some(payload);
        }

        match self.fetch_remote(&key).await {
            Ok(payload) => {
                let entry = CacheEntry {
                    query: key.clone(),
                    payload: payload.clone(),
                    fetched_at: Utc::now(),
                };
                if let Err(e) = self.write_entry(&entry).await {
                    tracing::warn!("Could not persist feed cache entry for '{}': {}", key, e);
                }
                *guard = Some(entry);
                Some(payload)
            }
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }

    /// Drops both the in-memory and the on-disk entry for `query`.
    pub async fn invalidate(&self, query: &str) {
        let key = normalize_query(query);
        if let Some((_, slot)) = self.slots.remove(&key) {
            *slot.lock().await = None;
        }
        let path = self.entry_path(&key);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Could not remove {}: {}", path.display(), e);
            }
        }
    }

    pub fn entry_path(&self, normalized_key: &str) -> PathBuf {
        let digest = Sha256::digest(normalized_key.as_bytes());
        self.cache_dir.join(format!("{}.json", hex::encode(digest)))
    }

    async fn read_entry(&self, key: &str) -> Option<CacheEntry> {
        let raw = tokio::fs::read(self.entry_path(key)).await.ok()?;
        match serde_json::from_slice::<CacheEntry>(&raw) {
            Ok(entry) if entry.query == key => Some(entry),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("Ignoring unreadable feed cache entry for '{}': {}", key, e);
                None
            }
        }
    }

    async fn write_entry(&self, entry: &CacheEntry) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let path = self.entry_path(&entry.query);
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        let body = serde_json::to_vec(entry)?;
        tokio::fs::write(&tmp, body).await?;
        // Rename is atomic, so racing writers of one key leave the last complete entry.
        tokio::fs::rename(&tmp, &path).await
    }

    async fn fetch_remote(&self, key: &str) -> AnalysisResult<Value> {
        let end = Utc::now();
        let start = end - chrono::Duration::days(PUBLICATION_WINDOW_DAYS);
        let date_format = "%Y-%m-%dT%H:%M:%S%.3f";

        let params = [
            ("keywordSearch", key.to_string()),
            ("resultsPerPage", RESULTS_PER_PAGE.to_string()),
            ("pubStartDate", start.format(date_format).to_string()),
            ("pubEndDate", end.format(date_format).to_string()),
        ];

        tracing::info!("Querying vulnerability feed for '{}'", key);
        let mut request = self.client.get(&self.feed_url).query(&params);
        if let Some(api_key) = &self.api_key {
            request = request.header("apiKey", api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AnalysisError::FeedFetch(format!("request for '{}' failed: {}", key, e)))?;

        if !response.status().is_success() {
            return Err(AnalysisError::FeedFetch(format!(
                "feed returned status {} for '{}'",
                response.status(),
                key
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AnalysisError::FeedFetch(format!("invalid feed payload for '{}': {}", key, e)))
    }
}

/// Trimmed, lowercased query; an empty query means the generic firmware feed.
pub fn normalize_query(query: &str) -> String {
    let trimmed = query.trim().to_lowercase();
    if trimmed.is_empty() {
        DEFAULT_QUERY.to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  OpenSSL "), "openssl");
        assert_eq!(normalize_query(""), "firmware");
    }

    #[test]
    fn test_validity_is_checked_against_reader_clock() {
        let fetched_at = Utc::now();
        let entry = CacheEntry {
            query: "busybox".to_string(),
            payload: Value::Null,
            fetched_at,
        };
        let ttl = Duration::from_secs(24 * 3600);
        assert!(entry.is_valid_at(fetched_at + chrono::Duration::hours(23), ttl));
        assert!(!entry.is_valid_at(fetched_at + chrono::Duration::hours(24), ttl));
    }

    #[test]
    fn test_entry_path_is_stable() {
        let cache = VulnerabilityFeedCache::new(
            Client::new(),
            "http://localhost",
            None,
            "/tmp/feed",
            Duration::from_secs(1),
        );
        assert_eq!(cache.entry_path("openssl"), cache.entry_path("openssl"));
        assert_ne!(cache.entry_path("openssl"), cache.entry_path("busybox"));
    }
}
