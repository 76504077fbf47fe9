//! Upstream connection establishment: opening the origin-facing TCP socket
//! and, for `CONNECT` targets, TLS-upgrading it.

use std::sync::Arc;
use std::time::Duration;

use proxy_core::SessionError;
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::stream::BoxedStream;

/// Opens a plain TCP connection to `host:port`, bounded by `timeout`.
pub async fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, SessionError> {
    let addr = (host, port);
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(SessionError::UpstreamConnect(e.to_string())),
        Err(_) => Err(SessionError::ConnectTimeout),
    }
}

/// Opens a TCP connection and immediately performs a TLS client handshake
/// against it, validating the chain with `client_config`. The TCP connect
/// and the handshake share a single `timeout` budget rather than each
/// getting their own, so the whole tunnel setup is bounded by one
/// connect-timeout window.
pub async fn connect_tls(
    host: &str,
    port: u16,
    timeout: Duration,
    client_config: Arc<rustls::ClientConfig>,
) -> Result<BoxedStream, SessionError> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| SessionError::UpstreamConnect(format!("invalid server name {host}: {e}")))?;
    let connector = TlsConnector::from(client_config);
    let addr = (host, port);
    tokio::time::timeout(timeout, async move {
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| SessionError::UpstreamConnect(e.to_string()))?;
        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| SessionError::UpstreamConnect(format!("tls handshake failed: {e}")))?;
        Ok::<BoxedStream, SessionError>(Box::new(tls))
    })
    .await
    .map_err(|_| SessionError::ConnectTimeout)?
}
