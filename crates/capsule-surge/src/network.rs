//! Declared networks and volumes (`spec.md` §4.9 step 2, §6).
//!
//! Surge's own scope ends at bookkeeping a network's logical identity;
//! the actual network namespace each capsule gets is created by
//! `capsule-runtime` per capsule (`spec.md` §4.4).

use std::collections::BTreeMap;

use capsule_core::{log_info, Scope};
use tokio::sync::Mutex;

use crate::spec::{NetworkSpec, NetworkType, VolumeSpec};

/// Fixed private subnet/gateway used when a project declares no
/// networks at all (`spec.md` §4.9 step 2 "a default bridge network
/// with a fixed private subnet/gateway").
pub const DEFAULT_NETWORK_NAME: &str = "default";
pub const DEFAULT_SUBNET: &str = "10.88.0.0/16";
pub const DEFAULT_GATEWAY: &str = "10.88.0.1";

#[derive(Clone, Debug)]
pub struct NetworkRecord {
    pub name: String,
    pub kind: NetworkType,
    pub subnet: String,
    pub gateway: Option<String>,
}

pub struct NetworkManager {
    networks: Mutex<BTreeMap<String, NetworkRecord>>,
    volumes: Mutex<BTreeMap<String, VolumeSpec>>,
    scope: Scope,
}

impl NetworkManager {
    pub fn new(project: &str) -> Self {
        Self {
            networks: Mutex::new(BTreeMap::new()),
            volumes: Mutex::new(BTreeMap::new()),
            scope: Scope::new("surge", project.to_string()),
        }
    }

    /// Create every declared network, or the default bridge network if
    /// none is declared.
    pub async fn ensure_networks(&self, declared: &BTreeMap<String, NetworkSpec>) {
        let mut networks = self.networks.lock().await;
        if declared.is_empty() {
            log_info!(&self.scope, "no networks declared, creating default bridge network");
            networks.insert(
                DEFAULT_NETWORK_NAME.to_string(),
                NetworkRecord {
                    name: DEFAULT_NETWORK_NAME.to_string(),
                    kind: NetworkType::Bridge,
                    subnet: DEFAULT_SUBNET.to_string(),
                    gateway: Some(DEFAULT_GATEWAY.to_string()),
                },
            );
            return;
        }
        for (name, spec) in declared {
            log_info!(&self.scope, network = %name, kind = ?spec.kind, "network created");
            networks.insert(
                name.clone(),
                NetworkRecord {
                    name: name.clone(),
                    kind: spec.kind,
                    subnet: spec.subnet.clone().unwrap_or_else(|| DEFAULT_SUBNET.to_string()),
                    gateway: spec.gateway.clone(),
                },
            );
        }
    }

    pub async fn ensure_volumes(&self, declared: &BTreeMap<String, VolumeSpec>) {
        let mut volumes = self.volumes.lock().await;
        for (name, spec) in declared {
            log_info!(&self.scope, volume = %name, driver = %spec.driver, "volume declared");
            volumes.insert(name.clone(), spec.clone());
        }
    }

    pub async fn network(&self, name: &str) -> Option<NetworkRecord> {
        self.networks.lock().await.get(name).cloned()
    }
}
