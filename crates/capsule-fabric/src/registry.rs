//! Service registry and peer table (`spec.md` §4.5 "Service Registry").

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::messages::ResourceUsageReport;

/// TTL defaults named in `spec.md` §6.
pub const SERVICE_TTL: Duration = Duration::from_secs(300);
pub const REMOTE_DISCOVERED_TTL: Duration = Duration::from_secs(60);
pub const CONTROL_RECORD_TTL: Duration = Duration::from_secs(86_400);

/// `spec.md` §3's `Service Endpoint`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub protocol: String,
    pub encryption_key: Option<[u8; 32]>,
}

/// What a node announces about itself to peers (`spec.md` §4.5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub address: String,
    pub port: u16,
    pub usage: ResourceUsageReport,
}

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

/// Local services and known peers, each with a TTL refreshed by
/// re-announcement or heartbeat (`spec.md` §4.5). Access is mediated
/// by per-map locks, copying keys before any I/O per `spec.md` §5.
pub struct ServiceRegistry {
    local: RwLock<HashMap<String, Entry<ServiceEndpoint>>>,
    peers: RwLock<HashMap<String, Entry<NodeInfo>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            local: RwLock::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_service(&self, endpoint: ServiceEndpoint, ttl: Duration) {
        self.local.write().await.insert(
            endpoint.name.clone(),
            Entry {
                value: endpoint,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub async fn lookup_service(&self, name: &str) -> Option<ServiceEndpoint> {
        let guard = self.local.read().await;
        let entry = guard.get(name)?;
        if entry.expires_at < Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Every currently-live local service, for announcement to peers.
    pub async fn local_services(&self) -> Vec<ServiceEndpoint> {
        let now = Instant::now();
        self.local
            .read()
            .await
            .values()
            .filter(|e| e.expires_at >= now)
            .map(|e| e.value.clone())
            .collect()
    }

    pub async fn announce_peer(&self, info: NodeInfo, ttl: Duration) {
        self.peers.write().await.insert(
            info.node_id.clone(),
            Entry {
                value: info,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub async fn lookup_peer(&self, node_id: &str) -> Option<NodeInfo> {
        let guard = self.peers.read().await;
        let entry = guard.get(node_id)?;
        if entry.expires_at < Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    pub async fn known_peers(&self) -> Vec<NodeInfo> {
        let now = Instant::now();
        self.peers
            .read()
            .await
            .values()
            .filter(|e| e.expires_at >= now)
            .map(|e| e.value.clone())
            .collect()
    }

    /// Drop every expired entry from both maps. Meant to be driven by
    /// a periodic task alongside heartbeat handling.
    pub async fn prune_expired(&self) {
        let now = Instant::now();
        self.local.write().await.retain(|_, e| e.expires_at >= now);
        self.peers.write().await.retain(|_, e| e.expires_at >= now);
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_service_is_not_returned() {
        let registry = ServiceRegistry::new();
        registry
            .register_service(
                ServiceEndpoint {
                    name: "web".into(),
                    address: "10.0.0.1".into(),
                    port: 8080,
                    protocol: "tcp".into(),
                    encryption_key: None,
                },
                Duration::from_millis(1),
            )
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(registry.lookup_service("web").await.is_none());
    }

    #[tokio::test]
    async fn live_service_round_trips() {
        let registry = ServiceRegistry::new();
        registry
            .register_service(
                ServiceEndpoint {
                    name: "web".into(),
                    address: "10.0.0.1".into(),
                    port: 8080,
                    protocol: "tcp".into(),
                    encryption_key: None,
                },
                SERVICE_TTL,
            )
            .await;
        assert!(registry.lookup_service("web").await.is_some());
    }
}
