//! Orchestrator / Surge (C9 of `spec.md`): applies declarative
//! multi-service project specs. See `spec.md` §4.9, §6.

mod build;
mod error;
mod network;
mod spec;
mod surge;
mod topo;

pub use error::{exit_code, Error, Result};
pub use network::{NetworkManager, NetworkRecord, DEFAULT_GATEWAY, DEFAULT_NETWORK_NAME, DEFAULT_SUBNET};
pub use spec::{
    FabricConfig, NetworkSpec, NetworkType, ProjectSpec, ResolverConfig, ServiceSpec, SnapshotsConfig,
    TriggersConfig, VolumeSpec, BASE_CAPSULE,
};
pub use surge::Surge;
pub use topo::{networks_in_use, order_services, reverse_order_services};
