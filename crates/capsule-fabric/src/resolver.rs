//! Name resolution (`spec.md` §4.5 "Resolution", §6).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::registry::{ServiceEndpoint, ServiceRegistry, REMOTE_DISCOVERED_TTL};

/// Queries a single remote peer for a service by name, used as the
/// last-resort step of [`Resolver::resolve`]. Implemented by the
/// transport layer, which this crate's `resolver` module has no
/// direct dependency on, keeping the lookup strategy testable without
/// a real QUIC connection.
#[async_trait]
pub trait RemoteLookup: Send + Sync {
    async fn query_peer(&self, peer_node_id: &str, name: &str) -> Option<ServiceEndpoint>;
}

struct CachedResult {
    endpoint: ServiceEndpoint,
    expires_at: Instant,
}

/// Resolves a short service name, trying in order: local registry;
/// canonical FQDN forms; remote query across known peers
/// (`spec.md` §4.5). Results are cached per record with a TTL.
pub struct Resolver<R: RemoteLookup> {
    registry: std::sync::Arc<ServiceRegistry>,
    domain: String,
    remote: R,
    cache: RwLock<HashMap<String, CachedResult>>,
}

impl<R: RemoteLookup> Resolver<R> {
    pub fn new(registry: std::sync::Arc<ServiceRegistry>, domain: impl Into<String>, remote: R) -> Self {
        Self {
            registry,
            domain: domain.into(),
            remote,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Canonical forms a `name` can appear under (`spec.md` §3, §6):
    /// the bare short name, `<name>.<domain>`, and the SRV-style
    /// `_app._transport.<name>.<domain>`.
    pub fn canonical_forms(&self, name: &str) -> Vec<String> {
        vec![
            name.to_string(),
            format!("{name}.{}", self.domain),
            format!("_app._transport.{name}.{}", self.domain),
        ]
    }

    /// Strip a canonical suffix back down to the bare short name the
    /// local registry actually indexes services under.
    fn bare_name(&self, candidate: &str) -> Option<String> {
        if let Some(rest) = candidate.strip_suffix(&format!(".{}", self.domain)) {
            return Some(rest.to_string());
        }
        if let Some(rest) = candidate.strip_prefix("_app._transport.") {
            if let Some(rest) = rest.strip_suffix(&format!(".{}", self.domain)) {
                return Some(rest.to_string());
            }
        }
        Some(candidate.to_string())
    }

    pub async fn resolve(&self, name: &str) -> Result<ServiceEndpoint> {
        if let Some(cached) = self.cache.read().await.get(name) {
            if cached.expires_at > Instant::now() {
                return Ok(cached.endpoint.clone());
            }
        }

        for candidate in self.canonical_forms(name) {
            let Some(bare) = self.bare_name(&candidate) else {
                continue;
            };
            if let Some(endpoint) = self.registry.lookup_service(&bare).await {
                return Ok(endpoint);
            }
        }

        for peer in self.registry.known_peers().await {
            if let Some(endpoint) = self.remote.query_peer(&peer.node_id, name).await {
                self.cache.write().await.insert(
                    name.to_string(),
                    CachedResult {
                        endpoint: endpoint.clone(),
                        expires_at: Instant::now() + REMOTE_DISCOVERED_TTL,
                    },
                );
                return Ok(endpoint);
            }
        }

        Err(Error::ServiceDiscoveryFailed(name.to_string()))
    }

    /// Cache a resolution result directly, e.g. after an announcement
    /// propagated to this node out-of-band of a `resolve` call.
    pub async fn cache_result(&self, name: &str, endpoint: ServiceEndpoint, ttl: Duration) {
        self.cache.write().await.insert(
            name.to_string(),
            CachedResult {
                endpoint,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SERVICE_TTL;

    struct NoPeers;

    #[async_trait]
    impl RemoteLookup for NoPeers {
        async fn query_peer(&self, _peer_node_id: &str, _name: &str) -> Option<ServiceEndpoint> {
            None
        }
    }

    fn endpoint(name: &str) -> ServiceEndpoint {
        ServiceEndpoint {
            name: name.to_string(),
            address: "10.0.0.5".into(),
            port: 9000,
            protocol: "tcp".into(),
            encryption_key: None,
        }
    }

    #[tokio::test]
    async fn resolves_from_local_registry_via_canonical_forms() {
        let registry = std::sync::Arc::new(ServiceRegistry::new());
        registry.register_service(endpoint("web"), SERVICE_TTL).await;
        let resolver = Resolver::new(registry, "myproj.local", NoPeers);

        assert!(resolver.resolve("web").await.is_ok());
        assert!(resolver.resolve("web.myproj.local").await.is_ok());
        assert!(resolver.resolve("_app._transport.web.myproj.local").await.is_ok());
    }

    #[tokio::test]
    async fn missing_service_is_discovery_failure() {
        let registry = std::sync::Arc::new(ServiceRegistry::new());
        let resolver = Resolver::new(registry, "myproj.local", NoPeers);
        let err = resolver.resolve("ghost").await.unwrap_err();
        assert!(matches!(err, Error::ServiceDiscoveryFailed(_)));
    }
}
