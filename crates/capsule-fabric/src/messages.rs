//! Wire message shapes (`spec.md` §6).

use serde::{Deserialize, Serialize};

use crate::crypto::NONCE_LEN;
use crate::registry::ServiceEndpoint;

/// An encrypted application message addressed to a service
/// (`spec.md` §6): `{dest-service, nonce, ciphertext}` under the
/// destination service's key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApplicationMessage {
    pub dest_service: String,
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

/// Control messages named in `spec.md` §6. Unlike application
/// messages these are not service-key-encrypted — they ride the
/// node-to-node QUIC/TLS channel, which is already authenticated and
/// confidential between the two nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ControlMessage {
    DeployCapsule {
        capsule_id: String,
    },
    RegisterService {
        name: String,
        port: u16,
    },
    Heartbeat {
        node_id: String,
        usage: ResourceUsageReport,
    },
    /// Last-resort lookup a node sends a known peer when a name isn't
    /// in its own registry (`spec.md` §4.5).
    ResolveService {
        name: String,
    },
    ResolveServiceReply {
        name: String,
        endpoint: Option<ServiceEndpoint>,
    },
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ResourceUsageReport {
    pub cpu_cores: f64,
    pub memory_gb: f64,
    pub storage_gb: f64,
    pub bw_mbps: f64,
}

/// Anything that can travel over a fabric connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FabricFrame {
    Application(ApplicationMessage),
    Control(ControlMessage),
}
