//! Upstream TLS client config: validates the origin's certificate chain
//! against the system trust store, falling back to Mozilla's
//! `webpki-roots` bundle when no native certs are found.

use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore};
use tracing::debug;

fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    if let Ok(native_certs) = rustls_native_certs::load_native_certs() {
        for cert in native_certs {
            let _ = root_store.add(cert);
        }
    }
    if root_store.is_empty() {
        debug!("no native root certs found, falling back to webpki-roots");
        root_store.roots = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
    } else {
        debug!(count = root_store.roots.len(), "loaded native root certs");
    }
    root_store
}

/// Default upstream client config: system trust store, no client auth, no
/// SNI overrides or certificate pinning.
pub fn client_config() -> Arc<ClientConfig> {
    let config = ClientConfig::builder()
        .with_root_certificates(build_root_store())
        .with_no_client_auth();
    Arc::new(config)
}
