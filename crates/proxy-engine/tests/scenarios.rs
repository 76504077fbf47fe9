//! End-to-end scenarios driven against real loopback TCP sockets: a mock
//! origin server stands in for "the internet" and a plain `TcpStream`
//! stands in for the downstream client.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use proxy_core::{ObserverFactory, PairObserver, RequestDescriptor, ResponseDescriptor, TlsIdentity};
use proxy_engine::PairConfig;
use rcgen::{generate_simple_self_signed, CertifiedKey};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Records every `PairObserver` callback in order so scenarios can assert on
/// exactly the exchanges a real `RecordSink` would have been given.
#[derive(Default)]
struct RecordingObserver {
    records: Arc<Mutex<Vec<Record>>>,
    pending_request: Option<(RequestDescriptor, String)>,
    pending_status: Option<u16>,
    pending_body: Vec<u8>,
}

struct Record {
    url: String,
    request_method: String,
    response_status: u16,
    body: Vec<u8>,
    truncated: bool,
}

impl PairObserver for RecordingObserver {
    fn on_request_headers(&mut self, request: &RequestDescriptor, url: &str) {
        self.pending_request = Some((request.clone(), url.to_string()));
        self.pending_status = None;
        self.pending_body.clear();
    }

    fn on_response_headers(&mut self, response: &ResponseDescriptor) {
        self.pending_status = Some(response.status);
    }

    fn on_response_body_chunk(&mut self, bytes: &[u8]) {
        self.pending_body.extend_from_slice(bytes);
    }

    fn on_response_complete(&mut self, truncated: bool) {
        let Some((request, url)) = self.pending_request.take() else {
            return;
        };
        self.records.lock().unwrap().push(Record {
            url,
            request_method: request.method,
            response_status: self.pending_status.take().unwrap_or(0),
            body: std::mem::take(&mut self.pending_body),
            truncated,
        });
    }
}

struct RecordingFactory {
    records: Arc<Mutex<Vec<Record>>>,
}

impl ObserverFactory for RecordingFactory {
    fn create(&self) -> Box<dyn PairObserver> {
        Box::new(RecordingObserver {
            records: self.records.clone(),
            ..Default::default()
        })
    }
}

fn recording_factory() -> (Arc<dyn ObserverFactory>, Arc<Mutex<Vec<Record>>>) {
    let records = Arc::new(Mutex::new(Vec::new()));
    (Arc::new(RecordingFactory { records: records.clone() }), records)
}

fn default_config() -> PairConfig {
    PairConfig {
        idle_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
    }
}

async fn spawn_echo_origin(responses: Vec<&'static [u8]>) -> (u16, tokio::task::JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let mut received = Vec::new();
        let (mut sock, _) = listener.accept().await.unwrap();
        for response in responses {
            let mut buf = [0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            received.extend_from_slice(&buf[..n]);
            sock.write_all(response).await.unwrap();
        }
        received
    });
    (port, handle)
}

async fn spawn_proxy(
    tls_identity: Arc<dyn TlsIdentity>,
    client_tls_config: Arc<ClientConfig>,
    observer_factory: Arc<dyn ObserverFactory>,
) -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            proxy_engine::run_pair(
                socket,
                peer,
                tls_identity.clone(),
                client_tls_config.clone(),
                observer_factory.clone(),
                default_config(),
            )
            .await;
        }
    });
    port
}

fn noop_tls_identity() -> Arc<dyn TlsIdentity> {
    // Each call gets its own throwaway directory so concurrently running
    // tests never race on the same CA cert/key files.
    let dir = tempfile::tempdir().unwrap().into_path();
    Arc::new(proxy_tls::CertAuthority::load_or_generate(&dir.join("ca.crt"), &dir.join("ca.key")).unwrap())
}

#[tokio::test]
async fn plain_get_is_forwarded_and_recorded() {
    let (origin_port, origin) = spawn_echo_origin(vec![b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc"]).await;
    let (factory, records) = recording_factory();
    let proxy_port = spawn_proxy(noop_tls_identity(), proxy_tls::client_config(), factory).await;

    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
    client
        .write_all(
            format!(
                "GET http://127.0.0.1:{origin_port}/a?b HTTP/1.1\r\nHost: 127.0.0.1:{origin_port}\r\nProxy-Connection: close\r\n\r\n"
            )
            .as_bytes(),
        )
        .await
        .unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc");

    let received = origin.await.unwrap();
    let received = String::from_utf8(received).unwrap();
    assert!(received.starts_with(&format!("GET /a?b HTTP/1.1\r\nHost: 127.0.0.1:{origin_port}\r\n")));
    assert!(received.contains("Connection: close"));
    assert!(!received.contains("Proxy-Connection"));

    let records = records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].url, format!("http://127.0.0.1:{origin_port}/a?b"));
    assert_eq!(records[0].response_status, 200);
    assert_eq!(records[0].body, b"abc");
}

#[tokio::test]
async fn chunked_response_is_forwarded_byte_exact() {
    let chunked = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n";
    let (origin_port, origin) = spawn_echo_origin(vec![chunked]).await;
    let (factory, records) = recording_factory();
    let proxy_port = spawn_proxy(noop_tls_identity(), proxy_tls::client_config(), factory).await;

    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
    client
        .write_all(
            format!(
                "GET http://127.0.0.1:{origin_port}/ HTTP/1.1\r\nHost: 127.0.0.1:{origin_port}\r\nConnection: close\r\n\r\n"
            )
            .as_bytes(),
        )
        .await
        .unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, chunked.to_vec());

    origin.await.unwrap();

    let records = records.lock().unwrap();
    assert_eq!(records[0].body, b"abcde");
}

#[tokio::test]
async fn pipelined_requests_are_forwarded_in_order_on_one_connection() {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let origin_port = listener.local_addr().unwrap().port();
    let origin = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let mut seen = Vec::new();
        for _ in 0..2 {
            let n = sock.read(&mut buf).await.unwrap();
            seen.push(String::from_utf8_lossy(&buf[..n]).into_owned());
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await.unwrap();
        }
        seen
    });

    let (factory, records) = recording_factory();
    let proxy_port = spawn_proxy(noop_tls_identity(), proxy_tls::client_config(), factory).await;

    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
    client
        .write_all(
            format!(
                "GET http://127.0.0.1:{origin_port}/first HTTP/1.1\r\nHost: 127.0.0.1:{origin_port}\r\n\r\n\
                 GET /second HTTP/1.1\r\nHost: 127.0.0.1:{origin_port}\r\nConnection: close\r\n\r\n"
            )
            .as_bytes(),
        )
        .await
        .unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(
        response,
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nokHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec()
    );

    let seen = origin.await.unwrap();
    assert!(seen[0].starts_with("GET /first HTTP/1.1"));
    assert!(seen[1].starts_with("GET /second HTTP/1.1"));

    assert_eq!(records.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn malformed_request_line_closes_with_no_reply_and_no_record() {
    let (factory, records) = recording_factory();
    let proxy_port = spawn_proxy(noop_tls_identity(), proxy_tls::client_config(), factory).await;

    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
    client.write_all(b"NOTAMETHOD\r\n\r\n").await.unwrap();
    client.shutdown().await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert!(response.is_empty());
    assert!(records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_upstream_closes_downstream_without_200() {
    // Port 0 is never a live listener to CONNECT to; the OS refuses the
    // connection immediately rather than timing out, which exercises the
    // same "no 200 ever written" contract as a connect timeout.
    let unreachable_port = {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    };

    let (factory, records) = recording_factory();
    let proxy_port = spawn_proxy(noop_tls_identity(), proxy_tls::client_config(), factory).await;

    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
    client
        .write_all(format!("CONNECT 127.0.0.1:{unreachable_port} HTTP/1.1\r\nHost: 127.0.0.1:{unreachable_port}\r\n\r\n").as_bytes())
        .await
        .unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert!(response.is_empty(), "no bytes, let alone a 200, should be written");
    assert!(records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn truncated_response_body_still_records_partial_body_truncated() {
    // The origin advertises a 10-byte body but closes after writing 3 bytes
    // of it and dropping the connection — a mid-body EOF.
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let origin_port = listener.local_addr().unwrap().port();
    let origin = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = sock.read(&mut buf).await.unwrap();
        sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc").await.unwrap();
        sock.shutdown().await.unwrap();
    });

    let (factory, records) = recording_factory();
    let proxy_port = spawn_proxy(noop_tls_identity(), proxy_tls::client_config(), factory).await;

    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
    client
        .write_all(
            format!(
                "GET http://127.0.0.1:{origin_port}/ HTTP/1.1\r\nHost: 127.0.0.1:{origin_port}\r\nConnection: close\r\n\r\n"
            )
            .as_bytes(),
        )
        .await
        .unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc");

    origin.await.unwrap();

    let records = records.lock().unwrap();
    assert_eq!(records.len(), 1, "sink still receives the partial exchange on BodyTruncation");
    assert_eq!(records[0].body, b"abc");
    assert!(records[0].truncated);
}

#[tokio::test]
async fn connect_tunnel_intercepts_tls_and_records_the_inner_exchange() {
    // The origin: a TLS server with a self-signed cert, trusted directly by
    // the proxy's upstream client config (added as its own root anchor).
    let CertifiedKey { cert: origin_cert, key_pair: origin_key } =
        generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let origin_cert_der = CertificateDer::from(origin_cert.der().to_vec());
    let origin_key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(origin_key.serialize_der()));

    let origin_server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![origin_cert_der.clone()], origin_key_der)
        .unwrap();
    let origin_acceptor = TlsAcceptor::from(Arc::new(origin_server_config));

    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let origin_port = listener.local_addr().unwrap().port();
    let origin = tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        let mut tls = origin_acceptor.accept(sock).await.unwrap();
        let mut buf = [0u8; 4096];
        let n = tls.read(&mut buf).await.unwrap();
        let request = String::from_utf8_lossy(&buf[..n]).into_owned();
        tls.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi").await.unwrap();
        request
    });

    let mut upstream_roots = RootCertStore::empty();
    upstream_roots.add(origin_cert_der).unwrap();
    let upstream_client_config = Arc::new(
        ClientConfig::builder()
            .with_root_certificates(upstream_roots)
            .with_no_client_auth(),
    );

    let tls_identity = noop_tls_identity();
    let (factory, records) = recording_factory();
    let proxy_port = spawn_proxy(tls_identity.clone(), upstream_client_config, factory).await;

    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
    client
        .write_all(format!("CONNECT localhost:{origin_port} HTTP/1.1\r\nHost: localhost:{origin_port}\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let mut established = [0u8; 64];
    let n = client.read(&mut established).await.unwrap();
    assert_eq!(&established[..n], b"HTTP/1.0 200 Connection established\r\n\r\n");

    // Trust the proxy's own minted CA for the inner TLS handshake.
    let mut downstream_roots = RootCertStore::empty();
    downstream_roots.add(CertificateDer::from(tls_identity.ca_bundle())).unwrap();
    let downstream_client_config = Arc::new(
        ClientConfig::builder()
            .with_root_certificates(downstream_roots)
            .with_no_client_auth(),
    );
    let connector = TlsConnector::from(downstream_client_config);
    let server_name = ServerName::try_from("localhost".to_string()).unwrap();
    let mut tunnel = connector.connect(server_name, client).await.unwrap();

    tunnel
        .write_all(b"GET /x HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    tunnel.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi");

    let request = origin.await.unwrap();
    assert!(request.starts_with("GET /x HTTP/1.1"));

    let records = records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].url, format!("https://localhost:{origin_port}/x"));
}
