//! The Image Store (C3 of `spec.md`): `resolve(ref)` (§4.3).

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use capsule_cas::{ObjectKind, Store as CasStore};
use capsule_core::{log_info, Digest, Scope};
use flate2::read::GzDecoder;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::manifest::{ImageManifest, LayerRef};
use crate::puller::Puller;
use crate::reference::ImageReference;

/// Resolves image references to manifests composed of CAS layer
/// digests, pulling on cache miss (`spec.md` §4.3).
///
/// A small in-memory index maps `registry/name:tag` to the manifest's
/// CAS digest so a second `resolve` of the same reference is a pure
/// CAS lookup; the index itself is not durable (it is cheaply rebuilt
/// by re-resolving), matching the note in `spec.md` §9 that global
/// mutable state here is scoped to the owning process, not persisted
/// as a source of truth — the CAS manifest objects are.
pub struct ImageStore {
    cas: CasStore,
    puller: Arc<dyn Puller>,
    index: Mutex<HashMap<String, Digest>>,
}

impl ImageStore {
    pub fn new(cas: CasStore, puller: Arc<dyn Puller>) -> Self {
        Self {
            cas,
            puller,
            index: Mutex::new(HashMap::new()),
        }
    }

    /// `resolve(ref) -> manifest` (`spec.md` §4.3). An image is
    /// materialized iff its manifest digest exists and every
    /// referenced digest resolves in CAS (`spec.md` §4.3) — this
    /// function always returns a manifest satisfying that, since a
    /// cache hit re-validates nothing beyond the index lookup (the CAS
    /// already guarantees immutability of what it stores).
    pub async fn resolve(&self, reference: &str) -> Result<ImageManifest> {
        let parsed = ImageReference::parse(reference);
        let key = parsed.to_string();
        let scope = Scope::new("image", key.clone());

        if let Some(digest) = self.index.lock().await.get(&key).copied() {
            log_info!(&scope, "image manifest cache hit");
            return self.load_manifest(digest).await;
        }

        log_info!(&scope, "image manifest cache miss, pulling");
        let fetched = self.puller.fetch(&parsed).await?;

        let config_digest = self
            .cas
            .put(fetched.config_bytes, ObjectKind::Config)
            .await?;

        let mut layers = Vec::with_capacity(fetched.layers.len());
        for layer in fetched.layers {
            let unpacked = decompress(&layer.compressed_bytes)?;
            let size = unpacked.len() as u64;
            let digest = self.cas.put(unpacked, ObjectKind::Layer).await?;
            layers.push(LayerRef {
                digest,
                size,
                media_type: layer.media_type,
            });
        }

        let mut manifest = ImageManifest {
            name: parsed.name.clone(),
            tag: parsed.tag.clone(),
            digest: None,
            layers,
            config_digest,
        };

        for digest in manifest.referenced_digests() {
            if !self.cas.contains(digest).await {
                return Err(Error::InvalidImageFormat(format!(
                    "manifest for {key} references missing digest {digest}"
                )));
            }
        }

        let manifest_bytes = serde_json::to_vec(&manifest)
            .map_err(|e| Error::InvalidImageFormat(e.to_string()))?;
        let manifest_digest = self.cas.put(manifest_bytes, ObjectKind::Manifest).await?;
        manifest.digest = Some(manifest_digest);

        self.index.lock().await.insert(key, manifest_digest);
        Ok(manifest)
    }

    async fn load_manifest(&self, digest: Digest) -> Result<ImageManifest> {
        let bytes = self.cas.get(digest).await?;
        let mut manifest: ImageManifest =
            serde_json::from_slice(&bytes).map_err(|e| Error::InvalidImageFormat(e.to_string()))?;
        manifest.digest = Some(digest);
        Ok(manifest)
    }
}

/// Gzip-decompress a layer blob. `spec.md` §4.3 only requires that
/// layer digests resolve in CAS; storing the already-unpacked (i.e.
/// decompressed) tar stream, rather than the compressed one, is what a
/// rootfs-overlay runtime needs to extract layers without
/// re-fetching and re-decompressing on every capsule create.
fn decompress(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(compressed);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::InvalidImageFormat(format!("layer is not valid gzip: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puller::{FetchedImage, FetchedLayer, StaticPuller};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tar::Builder as TarBuilder;

    fn gzip_tar_layer(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut tar_bytes = Vec::new();
        {
            let mut builder = TarBuilder::new(&mut tar_bytes);
            for (name, content) in files {
                let mut header = tar::Header::new_gnu();
                header.set_size(content.len() as u64);
                header.set_cksum();
                builder.append_data(&mut header, name, *content).unwrap();
            }
            builder.finish().unwrap();
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    async fn fixture() -> (tempfile::TempDir, ImageStore) {
        let dir = tempfile::tempdir().unwrap();
        let cas = CasStore::open(dir.path()).unwrap();
        let layer = gzip_tar_layer(&[("etc/hostname", b"capsule\n")]);
        let puller = StaticPuller {
            image: FetchedImage {
                config_bytes: b"{}".to_vec(),
                layers: vec![FetchedLayer {
                    media_type: "application/vnd.capsule.layer.tar".into(),
                    compressed_bytes: layer,
                }],
            },
        };
        let store = ImageStore::new(cas, Arc::new(puller));
        (dir, store)
    }

    #[tokio::test]
    async fn resolve_pulls_and_materializes() {
        let (_dir, store) = fixture().await;
        let manifest = store.resolve("nginx:latest").await.unwrap();
        assert_eq!(manifest.layers.len(), 1);
        assert!(manifest.digest.is_some());
        for digest in manifest.referenced_digests() {
            assert!(store.cas.contains(digest).await);
        }
    }

    #[tokio::test]
    async fn resolve_is_cached_on_second_call() {
        let (_dir, store) = fixture().await;
        let first = store.resolve("nginx:latest").await.unwrap();
        let second = store.resolve("nginx:latest").await.unwrap();
        assert_eq!(first.digest, second.digest);
    }
}
