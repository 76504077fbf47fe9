//! Local certificate authority.
//!
//! Loads a CA key/cert pair from disk if `--ca-cert`/`--ca-key` point at
//! existing files, otherwise generates a fresh CA and persists it so the
//! same authority is reused across restarts. Mints one leaf certificate per
//! hostname, cached for the process lifetime.

use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, Issuer, IsCa, KeyPair,
};
use tracing::{debug, instrument};

use proxy_core::{CertifiedKeyDer, TlsError, TlsIdentity};

pub struct CertAuthority {
    ca_cert_pem: String,
    ca_cert_der: Vec<u8>,
    ca_key: KeyPair,
    ca_params: CertificateParams,
    cache: DashMap<String, Arc<CertifiedKeyDer>>,
}

impl CertAuthority {
    /// Loads the CA from `cert_path`/`key_path` if both exist, otherwise
    /// generates a new self-signed CA and writes it to those paths.
    #[instrument(skip_all, fields(cert = %cert_path.display(), key = %key_path.display()))]
    pub fn load_or_generate(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        if cert_path.exists() && key_path.exists() {
            debug!("loading existing CA");
            Self::load(cert_path, key_path)
        } else {
            debug!("generating new CA");
            let authority = Self::generate()?;
            authority.persist(cert_path, key_path)?;
            Ok(authority)
        }
    }

    fn load(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let cert_pem = fs::read_to_string(cert_path)
            .map_err(|e| TlsError::LoadCa(format!("reading {}: {e}", cert_path.display())))?;
        let key_pem = fs::read_to_string(key_path)
            .map_err(|e| TlsError::LoadCa(format!("reading {}: {e}", key_path.display())))?;
        let ca_key = KeyPair::from_pem(&key_pem)
            .map_err(|e| TlsError::LoadCa(format!("parsing CA key: {e}")))?;
        let ca_params = CertificateParams::from_ca_cert_pem(&cert_pem)
            .map_err(|e| TlsError::LoadCa(format!("parsing CA cert: {e}")))?;
        let ca_cert_der = first_cert_der(&cert_pem)
            .ok_or_else(|| TlsError::LoadCa("CA cert file contains no PEM block".into()))?;
        Ok(Self {
            ca_cert_pem: cert_pem,
            ca_cert_der,
            ca_key,
            ca_params,
            cache: DashMap::new(),
        })
    }

    fn generate() -> Result<Self, TlsError> {
        let ca_key = KeyPair::generate()
            .map_err(|e| TlsError::LoadCa(format!("generating CA key: {e}")))?;
        let mut ca_params = CertificateParams::new(Vec::<String>::new())
            .map_err(|e| TlsError::LoadCa(format!("building CA params: {e}")))?;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.distinguished_name = authority_dn("warcproxy local CA");
        let ca_cert = ca_params
            .clone()
            .self_signed(&ca_key)
            .map_err(|e| TlsError::LoadCa(format!("self-signing CA: {e}")))?;
        Ok(Self {
            ca_cert_pem: ca_cert.pem(),
            ca_cert_der: ca_cert.der().to_vec(),
            ca_key,
            ca_params,
            cache: DashMap::new(),
        })
    }

    fn persist(&self, cert_path: &Path, key_path: &Path) -> Result<(), TlsError> {
        fs::write(cert_path, &self.ca_cert_pem)
            .map_err(|e| TlsError::LoadCa(format!("writing {}: {e}", cert_path.display())))?;
        fs::write(key_path, self.ca_key.serialize_pem())
            .map_err(|e| TlsError::LoadCa(format!("writing {}: {e}", key_path.display())))?;
        Ok(())
    }

    fn mint(&self, hostname: &str) -> Result<CertifiedKeyDer, TlsError> {
        let leaf_key = KeyPair::generate().map_err(|e| TlsError::Mint {
            host: hostname.to_string(),
            reason: format!("generating leaf key: {e}"),
        })?;
        let mut leaf_params = CertificateParams::new(vec![hostname.to_string()]).map_err(|e| {
            TlsError::Mint {
                host: hostname.to_string(),
                reason: format!("building leaf params: {e}"),
            }
        })?;
        leaf_params.distinguished_name = authority_dn(hostname);
        let issuer = Issuer::new(self.ca_params.clone(), &self.ca_key);
        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &issuer)
            .map_err(|e| TlsError::Mint {
                host: hostname.to_string(),
                reason: format!("signing leaf cert: {e}"),
            })?;
        Ok(CertifiedKeyDer {
            cert_chain: vec![leaf_cert.der().to_vec(), self.ca_cert_der.clone()],
            private_key_der: leaf_key.serialize_der(),
        })
    }
}

impl TlsIdentity for CertAuthority {
    #[instrument(skip(self))]
    fn mint_for(&self, hostname: &str) -> Result<CertifiedKeyDer, TlsError> {
        if let Some(existing) = self.cache.get(hostname) {
            debug!("leaf cert cache hit");
            return Ok((**existing).clone());
        }
        debug!("minting leaf cert");
        let minted = Arc::new(self.mint(hostname)?);
        self.cache.insert(hostname.to_string(), minted.clone());
        Ok((*minted).clone())
    }

    fn ca_bundle(&self) -> Vec<u8> {
        self.ca_cert_der.clone()
    }
}

fn authority_dn(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "warcproxy");
    dn
}

fn first_cert_der(cert_pem: &str) -> Option<Vec<u8>> {
    let mut reader = Cursor::new(cert_pem.as_bytes());
    rustls_pemfile::certs(&mut reader).next()?.ok().map(|der| der.to_vec())
}
