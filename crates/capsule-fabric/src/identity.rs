//! Per-node identity key pairs and the self-signed certificates used
//! to authenticate QUIC connections (`spec.md` §4.5 "Transport").

use rcgen::{CertificateParams, KeyPair};

use crate::error::{Error, Result};

/// A node's long-lived TLS identity: a self-signed certificate over
/// its own key pair. Real deployments would chain to a cluster CA;
/// that PKI layer is outside this core's scope (`spec.md` §1 excludes
/// wire-level registry/PKI specifics) — nodes authenticate each other
/// here by certificate pinning at the application layer instead.
pub struct NodeIdentity {
    pub node_id: String,
    pub cert_der: Vec<u8>,
    pub key_der: Vec<u8>,
}

impl NodeIdentity {
    pub fn generate(node_id: impl Into<String>) -> Result<Self> {
        let node_id = node_id.into();
        let key_pair = KeyPair::generate().map_err(|e| Error::Tls(e.to_string()))?;
        let params = CertificateParams::new(vec![node_id.clone()]).map_err(|e| Error::Tls(e.to_string()))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| Error::Tls(e.to_string()))?;

        Ok(Self {
            node_id,
            cert_der: cert.der().to_vec(),
            key_der: key_pair.serialize_der(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_distinct_identities() {
        let a = NodeIdentity::generate("node-a").unwrap();
        let b = NodeIdentity::generate("node-b").unwrap();
        assert_ne!(a.cert_der, b.cert_der);
    }
}
