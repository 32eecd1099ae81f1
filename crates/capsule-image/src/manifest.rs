//! Image manifests: `spec.md` §3's `Image Manifest`.

use capsule_cas::ObjectKind;
use capsule_core::Digest;
use serde::{Deserialize, Serialize};

/// A single layer reference inside a manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRef {
    pub digest: Digest,
    pub size: u64,
    pub media_type: String,
}

/// `spec.md` §3's `Image Manifest`, serialized as the JSON body of a
/// CAS object of kind [`ObjectKind::Manifest`]. `digest` is the digest
/// of this very serialization, filled in once by
/// [`crate::store::ImageStore::resolve`] at finalization time — every
/// manifest that exists in the store was already checked to reference
/// only digests present in CAS (`spec.md` §3 invariant).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageManifest {
    pub name: String,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
    pub layers: Vec<LayerRef>,
    pub config_digest: Digest,
}

impl ImageManifest {
    /// Every digest this manifest references, in the order the CAS
    /// garbage collector would want to mark them as live from
    /// (`spec.md` §4.1 `gc`).
    pub fn referenced_digests(&self) -> Vec<Digest> {
        let mut out: Vec<Digest> = self.layers.iter().map(|l| l.digest).collect();
        out.push(self.config_digest);
        out
    }

    pub fn object_kind() -> ObjectKind {
        ObjectKind::Manifest
    }
}
