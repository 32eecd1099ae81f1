//! Pluggable registry access.
//!
//! `spec.md` §1 excludes OCI registry wire-protocol byte layouts from
//! scope; this module only specifies the *contract* a registry client
//! fulfills for [`crate::store::ImageStore`] — fetch a config blob and
//! an ordered list of layer blobs for a resolved reference. The shipped
//! [`HttpPuller`] fetches gzip-compressed tar layers over plain HTTP(S)
//! using a simple, readable URL convention; it is not a claim of OCI
//! Distribution Spec compliance.

use async_trait::async_trait;

use crate::error::Result;
use crate::reference::ImageReference;

/// A layer as fetched from a registry, before it is unpacked into CAS.
pub struct FetchedLayer {
    pub media_type: String,
    pub compressed_bytes: Vec<u8>,
}

pub struct FetchedImage {
    pub config_bytes: Vec<u8>,
    pub layers: Vec<FetchedLayer>,
}

#[async_trait]
pub trait Puller: Send + Sync {
    async fn fetch(&self, reference: &ImageReference) -> Result<FetchedImage>;
}

/// Fetches `{registry}/v2/{name}/manifests/{tag}.json` for a small
/// JSON descriptor (`{"config": "<url>", "layers": ["<url>", ...]}`)
/// and then each referenced URL, gzip-decompressing nothing itself —
/// callers (the [`crate::store::ImageStore`]) decompress layers since
/// they alone know the unpack target.
pub struct HttpPuller {
    client: reqwest::Client,
}

impl HttpPuller {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpPuller {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(serde::Deserialize)]
struct RemoteDescriptor {
    config: String,
    layers: Vec<RemoteLayer>,
}

#[derive(serde::Deserialize)]
struct RemoteLayer {
    url: String,
    media_type: String,
}

#[async_trait]
impl Puller for HttpPuller {
    async fn fetch(&self, reference: &ImageReference) -> Result<FetchedImage> {
        let descriptor_url = format!(
            "https://{}/v2/{}/manifests/{}.json",
            reference.registry, reference.name, reference.tag
        );
        let descriptor: RemoteDescriptor = self
            .client
            .get(&descriptor_url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| crate::error::Error::RegistryError(e.to_string()))?
            .json()
            .await?;

        let config_bytes = self.client.get(&descriptor.config).send().await?.bytes().await?.to_vec();

        let mut layers = Vec::with_capacity(descriptor.layers.len());
        for layer in descriptor.layers {
            let compressed_bytes = self.client.get(&layer.url).send().await?.bytes().await?.to_vec();
            layers.push(FetchedLayer {
                media_type: layer.media_type,
                compressed_bytes,
            });
        }

        Ok(FetchedImage {
            config_bytes,
            layers,
        })
    }
}

/// An in-memory puller for tests and for the `capsule = "<base>"`
/// synthesized-manifest case (`spec.md` §4.9): always returns a fixed
/// image regardless of the reference asked for.
pub struct StaticPuller {
    pub image: FetchedImage,
}

#[async_trait]
impl Puller for StaticPuller {
    async fn fetch(&self, _reference: &ImageReference) -> Result<FetchedImage> {
        Ok(FetchedImage {
            config_bytes: self.image.config_bytes.clone(),
            layers: self
                .image
                .layers
                .iter()
                .map(|l| FetchedLayer {
                    media_type: l.media_type.clone(),
                    compressed_bytes: l.compressed_bytes.clone(),
                })
                .collect(),
        })
    }
}
