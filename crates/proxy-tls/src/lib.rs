//! Certificate authority and TLS configuration for both legs of the proxy:
//! a locally trusted CA that mints per-hostname leaf certificates for the
//! downstream (client-facing) TLS termination, and a
//! system-trust-store-validated client config for the upstream TLS
//! connection to the origin.

pub mod authority;
pub mod client;
pub mod server;

pub use authority::CertAuthority;
pub use client::client_config;
pub use server::server_config;
