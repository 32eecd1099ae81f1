//! Ties transport, identity, the service registry, and resolution
//! together into one node-facing handle (`spec.md` §4.5).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use capsule_core::{log_debug, log_info, log_warn, Scope};
use tokio::sync::{mpsc, RwLock};

use crate::crypto;
use crate::error::{Error, Result};
use crate::identity::NodeIdentity;
use crate::messages::{ApplicationMessage, ControlMessage, FabricFrame, ResourceUsageReport};
use crate::registry::{NodeInfo, ServiceEndpoint, ServiceRegistry, CONTROL_RECORD_TTL, SERVICE_TTL};
use crate::resolver::{RemoteLookup, Resolver};
use crate::transport::{read_frame, write_frame, Transport};

/// Depth of the inbox channel application messages are delivered to.
/// Matches the per-peer send-queue bound (`spec.md` §5).
const INBOX_DEPTH: usize = 256;

struct TransportLookup {
    transport: Arc<Transport>,
    peer_addrs: Arc<RwLock<HashMap<String, SocketAddr>>>,
}

#[async_trait]
impl RemoteLookup for TransportLookup {
    async fn query_peer(&self, peer_node_id: &str, name: &str) -> Option<ServiceEndpoint> {
        let addr = *self.peer_addrs.read().await.get(peer_node_id)?;
        let (mut send, mut recv) = self.transport.connect(addr, peer_node_id).await.ok()?;
        write_frame(
            &mut send,
            &FabricFrame::Control(ControlMessage::ResolveService { name: name.to_string() }),
        )
        .await
        .ok()?;
        send.finish().ok()?;
        match read_frame(&mut recv).await.ok()? {
            Some(FabricFrame::Control(ControlMessage::ResolveServiceReply { endpoint, .. })) => endpoint,
            _ => None,
        }
    }
}

/// A node's handle onto the fabric: its identity, transport, local
/// service registry, and resolver over known peers.
pub struct Fabric {
    pub identity: NodeIdentity,
    transport: Arc<Transport>,
    registry: Arc<ServiceRegistry>,
    resolver: Resolver<TransportLookup>,
    peer_addrs: Arc<RwLock<HashMap<String, SocketAddr>>>,
    inbox: mpsc::Sender<ApplicationMessage>,
    scope: Scope,
}

impl Fabric {
    /// Bind a QUIC endpoint for `node_id` at `addr` and return the
    /// handle plus the channel application messages arrive on. The
    /// caller is expected to spawn [`Fabric::serve`] to start accepting
    /// inbound connections.
    pub async fn bind(
        node_id: impl Into<String>,
        addr: SocketAddr,
        domain: impl Into<String>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<ApplicationMessage>)> {
        let node_id = node_id.into();
        let identity = NodeIdentity::generate(node_id.clone())?;
        let transport = Arc::new(Transport::bind(&identity, addr).await?);
        let registry = Arc::new(ServiceRegistry::new());
        let peer_addrs = Arc::new(RwLock::new(HashMap::new()));
        let resolver = Resolver::new(
            registry.clone(),
            domain,
            TransportLookup {
                transport: transport.clone(),
                peer_addrs: peer_addrs.clone(),
            },
        );
        let (tx, rx) = mpsc::channel(INBOX_DEPTH);

        let fabric = Arc::new(Self {
            identity,
            transport,
            registry,
            resolver,
            peer_addrs,
            inbox: tx,
            scope: Scope::new("node", node_id),
        });

        Ok((fabric, rx))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Accept inbound connections forever, dispatching each frame.
    /// Application messages are forwarded to the inbox returned by
    /// [`Fabric::bind`]; control messages are handled in place
    /// (registry updates, resolution replies).
    pub async fn serve(self: Arc<Self>) {
        loop {
            let Some((send, recv)) = self.transport.accept().await else {
                log_warn!(&self.scope, "fabric endpoint closed, no longer accepting connections");
                return;
            };
            let fabric = self.clone();
            tokio::spawn(async move {
                fabric.handle_connection(send, recv).await;
            });
        }
    }

    async fn handle_connection(&self, mut send: quinn::SendStream, mut recv: quinn::RecvStream) {
        while let Ok(Some(frame)) = read_frame(&mut recv).await {
            match frame {
                FabricFrame::Application(msg) => {
                    if self.inbox.try_send(msg).is_err() {
                        log_warn!(&self.scope, "application inbox full, dropping message");
                    }
                }
                FabricFrame::Control(ControlMessage::Heartbeat { node_id, usage }) => {
                    log_debug!(&self.scope, "heartbeat received from {}", node_id);
                    self.registry
                        .announce_peer(
                            NodeInfo {
                                node_id,
                                address: String::new(),
                                port: 0,
                                usage,
                            },
                            CONTROL_RECORD_TTL,
                        )
                        .await;
                }
                FabricFrame::Control(ControlMessage::ResolveService { name }) => {
                    let endpoint = self.registry.lookup_service(&name).await;
                    let reply = FabricFrame::Control(ControlMessage::ResolveServiceReply { name, endpoint });
                    if write_frame(&mut send, &reply).await.is_err() {
                        log_warn!(&self.scope, "failed replying to resolve-service request");
                        return;
                    }
                }
                FabricFrame::Control(ControlMessage::DeployCapsule { capsule_id }) => {
                    log_info!(&self.scope, "deploy-capsule control message for {}", capsule_id);
                }
                FabricFrame::Control(ControlMessage::ResolveServiceReply { .. }) => {}
            }
        }
    }

    pub async fn announce_service(&self, endpoint: ServiceEndpoint) {
        log_info!(&self.scope, "announcing service {}", endpoint.name);
        self.registry.register_service(endpoint, SERVICE_TTL).await;
    }

    /// Record a peer's address so it can be dialed for heartbeats,
    /// resolution queries, and message delivery.
    pub async fn remember_peer(&self, node_id: impl Into<String>, addr: SocketAddr) {
        self.peer_addrs.write().await.insert(node_id.into(), addr);
    }

    pub async fn resolve(&self, name: &str) -> Result<ServiceEndpoint> {
        self.resolver.resolve(name).await
    }

    pub async fn send_heartbeat(&self, peer_node_id: &str, usage: ResourceUsageReport) -> Result<()> {
        let addr = *self
            .peer_addrs
            .read()
            .await
            .get(peer_node_id)
            .ok_or_else(|| Error::ConnectionFailed(peer_node_id.to_string(), "unknown peer address".into()))?;
        let (mut send, _recv) = self.transport.connect(addr, peer_node_id).await?;
        write_frame(
            &mut send,
            &FabricFrame::Control(ControlMessage::Heartbeat {
                node_id: self.identity.node_id.clone(),
                usage,
            }),
        )
        .await?;
        send.finish().map_err(|e| Error::ConnectionFailed(peer_node_id.to_string(), e.to_string()))
    }

    /// Forward a `DEPLOY_CAPSULE:<id>` control message to `peer_node_id`
    /// (`spec.md` §4.8 "Placement" step 3). The node-to-node QUIC/TLS
    /// channel is already authenticated, which is the "signed" part of
    /// the spec's wording — there is no additional application-layer
    /// signature on top.
    pub async fn send_deploy_capsule(&self, peer_node_id: &str, capsule_id: impl Into<String>) -> Result<()> {
        let addr = *self
            .peer_addrs
            .read()
            .await
            .get(peer_node_id)
            .ok_or_else(|| Error::ConnectionFailed(peer_node_id.to_string(), "unknown peer address".into()))?;
        let (mut send, _recv) = self.transport.connect(addr, peer_node_id).await?;
        write_frame(
            &mut send,
            &FabricFrame::Control(ControlMessage::DeployCapsule { capsule_id: capsule_id.into() }),
        )
        .await?;
        send.finish().map_err(|e| Error::ConnectionFailed(peer_node_id.to_string(), e.to_string()))
    }

    /// Encrypt `plaintext` under the destination service's key and
    /// deliver it to `peer_node_id` (`spec.md` §6).
    pub async fn send_message(
        &self,
        peer_node_id: &str,
        dest_service: impl Into<String>,
        key: &[u8; 32],
        plaintext: &[u8],
    ) -> Result<()> {
        let addr = *self
            .peer_addrs
            .read()
            .await
            .get(peer_node_id)
            .ok_or_else(|| Error::ConnectionFailed(peer_node_id.to_string(), "unknown peer address".into()))?;
        let (nonce, ciphertext) = crypto::encrypt(key, plaintext)?;
        let (mut send, _recv) = self.transport.connect(addr, peer_node_id).await?;
        write_frame(
            &mut send,
            &FabricFrame::Application(ApplicationMessage {
                dest_service: dest_service.into(),
                nonce,
                ciphertext,
            }),
        )
        .await?;
        send.finish().map_err(|e| Error::ConnectionFailed(peer_node_id.to_string(), e.to_string()))
    }
}
