//! Downstream-facing (server) TLS config: the certificate served for a
//! `CONNECT`-tunnelled host is chosen per-SNI by asking the `TlsIdentity`
//! oracle to mint one.

use std::sync::Arc;

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::warn;

use proxy_core::TlsIdentity;

/// Resolves a server certificate per SNI hostname, falling back to the
/// `CONNECT` target host itself when the client sends no SNI (or one that
/// doesn't match) — the proxy already knows which host this tunnel is for
/// and shouldn't need the client's cooperation to mint the right leaf.
/// `TlsIdentity` implementations are expected to cache minted leaves
/// themselves, so this does not add its own cache on top.
struct SniResolver {
    identity: Arc<dyn TlsIdentity>,
    connect_host: String,
}

/// The CONNECT target is the authoritative host: a client that sent no SNI,
/// or one whose SNI disagrees with what it CONNECTed to, still gets a leaf
/// minted for the host the tunnel is actually for.
fn select_hostname<'a>(sni: Option<&'a str>, connect_host: &'a str) -> &'a str {
    match sni {
        Some(sni) if sni.eq_ignore_ascii_case(connect_host) => sni,
        _ => connect_host,
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let hostname = select_hostname(client_hello.server_name(), &self.connect_host);
        let minted = match self.identity.mint_for(hostname) {
            Ok(minted) => minted,
            Err(e) => {
                warn!(host = hostname, error = %e, "failed to mint leaf certificate");
                return None;
            }
        };
        let cert_chain: Vec<CertificateDer<'static>> = minted
            .cert_chain
            .into_iter()
            .map(CertificateDer::from)
            .collect();
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(minted.private_key_der));
        let signing_key = match rustls::crypto::ring::sign::any_supported_type(&key_der) {
            Ok(key) => key,
            Err(e) => {
                warn!(host = hostname, error = %e, "unsupported leaf key type");
                return None;
            }
        };
        Some(Arc::new(CertifiedKey::new(cert_chain, signing_key)))
    }
}

/// Builds the server-side `rustls::ServerConfig` used to terminate a
/// `CONNECT`-tunnelled client TLS session. `connect_host` is the
/// CONNECT-target host, minted when the client's handshake carries no (or a
/// mismatched) SNI name.
pub fn server_config(identity: Arc<dyn TlsIdentity>, connect_host: impl Into<String>) -> ServerConfig {
    let mut config = ServerConfig::builder().with_no_client_auth().with_cert_resolver(Arc::new(SniResolver {
        identity,
        connect_host: connect_host.into(),
    }));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    config
}
