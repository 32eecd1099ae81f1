//! Network Fabric (`spec.md` §4.5): encrypted node-to-node transport,
//! service registry, and name resolution.

pub mod crypto;
pub mod error;
pub mod fabric;
pub mod identity;
pub mod messages;
pub mod registry;
pub mod resolver;
pub mod transport;

pub use error::{Error, Result};
pub use fabric::Fabric;
pub use identity::NodeIdentity;
pub use messages::{ApplicationMessage, ControlMessage, FabricFrame, ResourceUsageReport};
pub use registry::{NodeInfo, ServiceEndpoint, ServiceRegistry};
pub use resolver::{RemoteLookup, Resolver};
