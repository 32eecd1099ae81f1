use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex as SyncMutex;

use capsule_core::digest::DIGEST_BYTES;
use capsule_core::{log_info, log_warn, Digest, Scope};
use serde::{Deserialize, Serialize};
use tokio::task::spawn_blocking;

use crate::error::{Error, Result};

/// The kind of content a CAS object holds (`spec.md` §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Layer,
    Manifest,
    Config,
    Capsule,
    Build,
    /// Snapshot blobs (`spec.md` §4.6): filesystem archives, memory
    /// dumps, and the snapshot metadata record itself.
    Snapshot,
}

/// Sidecar metadata persisted next to each object's bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Sidecar {
    size: u64,
    kind: ObjectKind,
    metadata: HashMap<String, String>,
}

/// A read-only view of a stored object's bookkeeping, without its bytes.
#[derive(Clone, Debug)]
pub struct CasObject {
    pub digest: Digest,
    pub size: u64,
    pub kind: ObjectKind,
    pub metadata: HashMap<String, String>,
}

/// Result of a garbage-collection sweep.
#[derive(Clone, Debug, Default)]
pub struct GcStats {
    pub objects_swept: u64,
    pub bytes_reclaimed: u64,
}

/// A content-addressed object store rooted at a directory on a single
/// filesystem (atomicity relies on `rename(2)` staying within one
/// filesystem).
#[derive(Clone)]
pub struct Store {
    root: PathBuf,
    /// Memoizes `put_path` by canonical path + file (size, mtime) so a
    /// path that hasn't changed is never re-hashed. Keyed on the triple
    /// rather than just the path so edits after a previous `put_path`
    /// call are still picked up.
    path_cache: std::sync::Arc<SyncMutex<HashMap<PathBuf, (u64, std::time::SystemTime, Digest)>>>,
}

impl Store {
    /// Open (creating if absent) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("tmp"))?;
        Ok(Self {
            root,
            path_cache: std::sync::Arc::new(SyncMutex::new(HashMap::new())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `put(bytes, kind) -> digest` (`spec.md` §4.1). Idempotent: a
    /// repeated `put` of equal bytes returns the same digest without
    /// rewriting the object.
    pub async fn put(&self, bytes: Vec<u8>, kind: ObjectKind) -> Result<Digest> {
        self.put_with_metadata(bytes, kind, HashMap::new()).await
    }

    pub async fn put_with_metadata(
        &self,
        bytes: Vec<u8>,
        kind: ObjectKind,
        metadata: HashMap<String, String>,
    ) -> Result<Digest> {
        let root = self.root.clone();
        spawn_blocking(move || write_object_sync(&root, &bytes, kind, metadata))
            .await
            .expect("CAS write task panicked")
    }

    /// `get(digest) -> bytes` (`spec.md` §4.1). Re-hashes on read;
    /// corrupted objects are quarantined (deleted) and reported as
    /// [`Error::HashMismatch`] so the caller can re-fetch from another
    /// source if one exists.
    pub async fn get(&self, digest: Digest) -> Result<Vec<u8>> {
        let root = self.root.clone();
        spawn_blocking(move || read_object_sync(&root, digest))
            .await
            .expect("CAS read task panicked")
    }

    /// Look up an object's bookkeeping (kind, size, metadata) without
    /// reading its bytes.
    pub async fn stat(&self, digest: Digest) -> Result<CasObject> {
        let root = self.root.clone();
        spawn_blocking(move || stat_object_sync(&root, digest))
            .await
            .expect("CAS stat task panicked")
    }

    pub async fn contains(&self, digest: Digest) -> bool {
        self.stat(digest).await.is_ok()
    }

    /// `put_path(path, kind) -> digest` (`spec.md` §4.1): memoized per
    /// path through a dedup cache keyed on (size, mtime), otherwise
    /// identical to [`put`](Self::put).
    pub async fn put_path(&self, path: impl Into<PathBuf>, kind: ObjectKind) -> Result<Digest> {
        let path = path.into();
        let meta = fs::metadata(&path)?;
        let key = (meta.len(), meta.modified()?);

        if let Some((size, mtime, digest)) = self.path_cache.lock().unwrap().get(&path).cloned() {
            if (size, mtime) == key {
                return Ok(digest);
            }
        }

        let bytes = fs::read(&path)?;
        let digest = self.put(bytes, kind).await?;
        self.path_cache
            .lock()
            .unwrap()
            .insert(path, (key.0, key.1, digest));
        Ok(digest)
    }

    /// `gc(roots)` (`spec.md` §4.1): best-effort mark-sweep. `live` must
    /// already contain every digest transitively reachable from the
    /// platform's actual roots (image manifests, snapshots, build
    /// outputs) — the store itself has no notion of a manifest's
    /// internal structure, so it cannot resolve "reachable from" on its
    /// own; the caller (image store / snapshot engine / build cache)
    /// is responsible for expanding roots before calling this.
    pub async fn gc(&self, live: HashSet<Digest>) -> Result<GcStats> {
        let root = self.root.clone();
        spawn_blocking(move || gc_sync(&root, live))
            .await
            .expect("CAS gc task panicked")
    }
}

fn object_path(root: &Path, digest: &Digest) -> PathBuf {
    let hex = digest.hex();
    root.join("objects").join(&hex[..2]).join(&hex[2..])
}

fn sidecar_path(root: &Path, digest: &Digest) -> PathBuf {
    let hex = digest.hex();
    root.join("objects")
        .join(&hex[..2])
        .join(format!("{}.meta", &hex[2..]))
}

fn write_object_sync(
    root: &Path,
    bytes: &[u8],
    kind: ObjectKind,
    metadata: HashMap<String, String>,
) -> Result<Digest> {
    let digest = Digest::of(bytes);
    let target = object_path(root, &digest);

    if target.exists() {
        // Idempotent: identical content already stored under this digest.
        return Ok(digest);
    }

    let shard_dir = target.parent().expect("object path has a parent");
    fs::create_dir_all(shard_dir)?;

    let tmp_dir = root.join("tmp");
    let tmp_path = tmp_dir.join(digest.hex());
    {
        let mut tmp = fs::File::create(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, &target)?;

    let sidecar = Sidecar {
        size: bytes.len() as u64,
        kind,
        metadata,
    };
    let sidecar_bytes =
        serde_json::to_vec(&sidecar).map_err(|e| Error::InvalidContent(e.to_string()))?;
    fs::write(sidecar_path(root, &digest), sidecar_bytes)?;

    Ok(digest)
}

fn read_object_sync(root: &Path, digest: Digest) -> Result<Vec<u8>> {
    let target = object_path(root, &digest);
    let bytes = fs::read(&target).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(digest)
        } else {
            Error::StorageError(e)
        }
    })?;

    if !digest.verify(&bytes) {
        let scope = Scope::new("cas", digest.to_string());
        log_warn!(&scope, "hash mismatch on read, quarantining object");
        let _ = fs::remove_file(&target);
        let _ = fs::remove_file(sidecar_path(root, &digest));
        return Err(Error::HashMismatch { digest });
    }

    Ok(bytes)
}

fn stat_object_sync(root: &Path, digest: Digest) -> Result<CasObject> {
    let target = object_path(root, &digest);
    let file_meta = fs::metadata(&target).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(digest)
        } else {
            Error::StorageError(e)
        }
    })?;

    let sidecar_bytes = fs::read(sidecar_path(root, &digest))?;
    let sidecar: Sidecar =
        serde_json::from_slice(&sidecar_bytes).map_err(|e| Error::InvalidContent(e.to_string()))?;

    Ok(CasObject {
        digest,
        size: file_meta.len(),
        kind: sidecar.kind,
        metadata: sidecar.metadata,
    })
}

fn gc_sync(root: &Path, live: HashSet<Digest>) -> Result<GcStats> {
    let objects_dir = root.join("objects");
    let mut stats = GcStats::default();

    for entry in walkdir::WalkDir::new(&objects_dir)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if file_name.ends_with(".meta") {
            continue;
        }
        let shard = entry
            .path()
            .parent()
            .and_then(|p| p.file_name())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let hex = format!("{shard}{file_name}");
        let Ok(digest) = format!("sha256:{hex}").parse::<Digest>() else {
            continue;
        };

        if live.contains(&digest) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let _ = fs::remove_file(entry.path());
        let _ = fs::remove_file(sidecar_path(root, &digest));
        stats.objects_swept += 1;
        stats.bytes_reclaimed += size;
    }

    let scope = Scope::new("cas", "gc");
    log_info!(
        &scope,
        objects_swept = stats.objects_swept,
        bytes_reclaimed = stats.bytes_reclaimed,
        "garbage collection sweep complete"
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_bytes_len_matches() {
        assert_eq!(DIGEST_BYTES, 32);
    }

    #[tokio::test]
    async fn put_is_idempotent_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let d1 = store.put(b"hello".to_vec(), ObjectKind::Layer).await.unwrap();
        let d2 = store.put(b"hello".to_vec(), ObjectKind::Layer).await.unwrap();
        assert_eq!(d1, d2);

        let object_count = walkdir::WalkDir::new(dir.path().join("objects"))
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && !e.file_name().to_string_lossy().ends_with(".meta"))
            .count();
        assert_eq!(object_count, 1);

        let bytes = store.get(d1).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let bogus = Digest::of(b"never stored");
        assert!(matches!(store.get(bogus).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn get_rehashes_and_quarantines_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let digest = store.put(b"hello".to_vec(), ObjectKind::Layer).await.unwrap();

        let path = object_path(dir.path(), &digest);
        fs::write(&path, b"tampered").unwrap();

        let err = store.get(digest).await.unwrap_err();
        assert!(matches!(err, Error::HashMismatch { .. }));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn put_path_is_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let file = dir.path().join("input.bin");
        fs::write(&file, b"some bytes").unwrap();

        let d1 = store.put_path(&file, ObjectKind::Build).await.unwrap();
        let d2 = store.put_path(&file, ObjectKind::Build).await.unwrap();
        assert_eq!(d1, d2);
    }

    #[tokio::test]
    async fn gc_sweeps_unreferenced_objects() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let kept = store.put(b"keep me".to_vec(), ObjectKind::Layer).await.unwrap();
        let swept = store.put(b"sweep me".to_vec(), ObjectKind::Layer).await.unwrap();

        let mut live = HashSet::new();
        live.insert(kept);
        let stats = store.gc(live).await.unwrap();

        assert_eq!(stats.objects_swept, 1);
        assert!(store.contains(kept).await);
        assert!(!store.contains(swept).await);
    }
}

#[cfg(test)]
mod digest_properties {
    use capsule_core::Digest;
    use proptest::prelude::*;

    proptest! {
        /// For all content `b`, `Digest::of(b)` verifies against `b` and
        /// round-trips through its printable form (`spec.md` §8).
        #[test]
        fn digest_round_trips(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let digest = Digest::of(&bytes);
            prop_assert!(digest.verify(&bytes));
            let printed = digest.to_string();
            let parsed: Digest = printed.parse().unwrap();
            prop_assert_eq!(digest, parsed);
        }
    }
}
