use crate::error::TlsError;

/// A minted leaf certificate and its private key, both DER-encoded so that
/// this crate never has to depend on a concrete TLS stack.
#[derive(Debug, Clone)]
pub struct CertifiedKeyDer {
    /// Leaf certificate first, followed by any intermediates.
    pub cert_chain: Vec<Vec<u8>>,
    /// PKCS#8 DER-encoded private key for the leaf certificate.
    pub private_key_der: Vec<u8>,
}

/// Mints a certificate for a given hostname, signed by a locally trusted
/// CA, and exposes that CA's bundle
/// for installation in a client's trust store. Implementations must be safe
/// for concurrent minting and should cache minted leaves by hostname.
pub trait TlsIdentity: Send + Sync {
    fn mint_for(&self, hostname: &str) -> Result<CertifiedKeyDer, TlsError>;

    /// DER-encoded CA certificate, suitable for installing into a client's
    /// trust store.
    fn ca_bundle(&self) -> Vec<u8>;
}
