// limitwatch/src/fetch/cache.rs
//
// Opt-in response cache. Raw bodies live under
//   <dir>/<hex(SHA256(request signature))>.json
// and are memoized in-process so a run never reads the same file twice.
// Hits skip the scheduler entirely; they cost no remote quota. An entry whose
// body no longer parses is evicted and refetched.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::PageRequest;
use crate::error::FetchError;

pub struct ResponseCache {
    dir:  PathBuf,
    memo: DashMap<String, Arc<str>>,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, memo: DashMap::new() })
    }

    pub fn key(request: &PageRequest) -> String {
        let mut h = Sha256::new();
        h.update(request.signature().as_bytes());
        hex::encode(h.finalize())
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub async fn get(&self, request: &PageRequest) -> Result<Option<Arc<str>>, FetchError> {
        let key = Self::key(request);
        if let Some(hit) = self.memo.get(&key) {
            return Ok(Some(Arc::clone(hit.value())));
        }
        match tokio::fs::read_to_string(self.path(&key)).await {
            Ok(body) => {
                debug!("cache hit {}", key);
                let body: Arc<str> = body.into();
                self.memo.insert(key, Arc::clone(&body));
                Ok(Some(body))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Best effort; a failed write only costs a refetch next run.
    pub async fn put(&self, request: &PageRequest, body: &str) {
        let key = Self::key(request);
        if let Err(e) = tokio::fs::write(self.path(&key), body).await {
            warn!("Cache write failed for {}: {}", key, e);
        }
        self.memo.insert(key, body.into());
    }

    /// Drop an entry whose body turned out to be unusable.
    pub async fn evict(&self, request: &PageRequest) {
        let key = Self::key(request);
        self.memo.remove(&key);
        match tokio::fs::remove_file(self.path(&key)).await {
            Ok(()) => debug!("cache evict {}", key),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Cache evict failed for {}: {}", key, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TimeRange;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn query(filter: &str) -> PageRequest {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        PageRequest::Query {
            filter: filter.into(),
            batch:  1000,
            range:  TimeRange::new(t - chrono::Duration::hours(1), t),
        }
    }

    #[test]
    fn keys_are_stable_and_distinct() {
        assert_eq!(ResponseCache::key(&query("a")), ResponseCache::key(&query("a")));
        assert_ne!(ResponseCache::key(&query("a")), ResponseCache::key(&query("b")));
        assert_eq!(ResponseCache::key(&query("a")).len(), 64);
    }

    #[tokio::test]
    async fn miss_then_hit_survives_a_fresh_instance() {
        let dir = tempdir().unwrap();
        let c   = ResponseCache::new(dir.path()).unwrap();
        let req = query("creatorid=\"1\"");

        assert!(c.get(&req).await.unwrap().is_none());
        c.put(&req, r#"{"data":[]}"#).await;
        assert_eq!(c.get(&req).await.unwrap().as_deref(), Some(r#"{"data":[]}"#));

        let reopened = ResponseCache::new(dir.path()).unwrap();
        assert_eq!(reopened.get(&req).await.unwrap().as_deref(), Some(r#"{"data":[]}"#));
    }

    #[tokio::test]
    async fn evict_removes_memo_and_file() {
        let dir = tempdir().unwrap();
        let c   = ResponseCache::new(dir.path()).unwrap();
        let req = query("x");

        c.put(&req, "garbage").await;
        assert!(dir.path().join(format!("{}.json", ResponseCache::key(&req))).exists());

        c.evict(&req).await;
        assert!(c.get(&req).await.unwrap().is_none());
        assert!(!dir.path().join(format!("{}.json", ResponseCache::key(&req))).exists());
        // evicting a missing entry is a no-op
        c.evict(&req).await;
    }
}
