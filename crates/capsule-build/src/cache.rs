//! The build cache: `input_fingerprint -> output manifest digest`
//! (`spec.md` §3, §4.2 step 2).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use capsule_core::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;

/// `spec.md` §3's `Build Cache Entry`. Idempotent: a repeated insert
/// with the same fingerprint overwrites the existing entry only if
/// `success` is true, so a flaky failed rebuild never clobbers a good
/// cached result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildCacheEntry {
    pub input_fingerprint: Digest,
    pub output_digest: Digest,
    pub taken_at: DateTime<Utc>,
    pub build_ms: u64,
    pub success: bool,
}

/// A small JSON-backed index mapping fingerprints to cache entries.
/// Persisted as a single file; reads and writes are serialized behind
/// one async mutex since the whole index is small relative to disk
/// I/O latency and concurrent builders are rare in comparison with CAS
/// object traffic.
pub struct BuildCache {
    index_path: PathBuf,
    index: Arc<Mutex<HashMap<String, BuildCacheEntry>>>,
}

impl BuildCache {
    pub async fn open(index_path: impl Into<PathBuf>) -> Result<Self> {
        let index_path = index_path.into();
        let index = if let Ok(raw) = tokio::fs::read(&index_path).await {
            serde_json::from_slice(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self {
            index_path,
            index: Arc::new(Mutex::new(index)),
        })
    }

    pub async fn lookup(&self, fingerprint: Digest) -> Option<BuildCacheEntry> {
        self.index.lock().await.get(&fingerprint.to_string()).cloned()
    }

    /// Idempotent insert: only overwrites an existing entry for the
    /// same fingerprint when `entry.success` is true (`spec.md` §3).
    pub async fn insert(&self, entry: BuildCacheEntry) -> Result<()> {
        let mut guard = self.index.lock().await;
        let key = entry.input_fingerprint.to_string();
        match guard.get(&key) {
            Some(existing) if !entry.success && existing.success => {
                // Don't let a failed rebuild clobber a known-good entry.
                return Ok(());
            }
            _ => {
                guard.insert(key, entry);
            }
        }
        let snapshot = guard.clone();
        drop(guard);
        persist(&self.index_path, &snapshot).await
    }
}

async fn persist(path: &Path, index: &HashMap<String, BuildCacheEntry>) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(index).expect("build cache index is serializable");
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_insert_does_not_clobber_successful_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BuildCache::open(dir.path().join("index.json")).await.unwrap();
        let fp = Digest::of(b"fingerprint");

        cache
            .insert(BuildCacheEntry {
                input_fingerprint: fp,
                output_digest: Digest::of(b"good"),
                taken_at: Utc::now(),
                build_ms: 10,
                success: true,
            })
            .await
            .unwrap();

        cache
            .insert(BuildCacheEntry {
                input_fingerprint: fp,
                output_digest: Digest::of(b"bad"),
                taken_at: Utc::now(),
                build_ms: 5,
                success: false,
            })
            .await
            .unwrap();

        let entry = cache.lookup(fp).await.unwrap();
        assert_eq!(entry.output_digest, Digest::of(b"good"));
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let fp = Digest::of(b"fingerprint");
        {
            let cache = BuildCache::open(&path).await.unwrap();
            cache
                .insert(BuildCacheEntry {
                    input_fingerprint: fp,
                    output_digest: Digest::of(b"out"),
                    taken_at: Utc::now(),
                    build_ms: 1,
                    success: true,
                })
                .await
                .unwrap();
        }
        let reopened = BuildCache::open(&path).await.unwrap();
        assert!(reopened.lookup(fp).await.is_some());
    }
}
