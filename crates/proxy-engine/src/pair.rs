//! The per-connection pair coordinator. Owns both the downstream and
//! upstream halves directly (rather than handing them shared references to
//! each other) and drives the full `ReadingFirstRequest -> AwaitingUpstream
//! -> ForwardingHttp -> Draining -> Closed` lifecycle on a single spawned
//! task — tokio's scheduler gives each pair its own logical thread of
//! control regardless of how the runtime happens to multiplex OS threads.

use std::sync::Arc;
use std::time::Duration;

use proxy_core::{
    reconstruct_url, BodyLength, HeaderList, HttpVersion, ObserverFactory, PairObserver,
    RequestDescriptor, ResponseDescriptor, SessionError, TlsIdentity,
};
use proxy_parser::{MessageHead, MessageParser, MessageSink, StartLine};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, instrument};

use crate::downstream::{self, Target};
use crate::stream::BoxedStream;
use crate::upstream;

/// Timeout tunables for a pair's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct PairConfig {
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

const READ_CHUNK: usize = 8192;

/// Entry point: runs one accepted downstream connection to completion,
/// logging (rather than propagating) any session error, since the caller
/// is an accept loop that must keep serving other pairs.
#[instrument(skip_all, fields(peer = %peer_addr))]
pub async fn run_pair(
    downstream: TcpStream,
    peer_addr: std::net::SocketAddr,
    tls_identity: Arc<dyn TlsIdentity>,
    client_tls_config: Arc<rustls::ClientConfig>,
    observer_factory: Arc<dyn ObserverFactory>,
    config: PairConfig,
) {
    let mut observer = observer_factory.create();
    if let Err(e) = run(downstream, tls_identity, client_tls_config, observer.as_mut(), config).await {
        debug!(error = %e, "pair closed");
    }
}

async fn run(
    mut downstream: TcpStream,
    tls_identity: Arc<dyn TlsIdentity>,
    client_tls_config: Arc<rustls::ClientConfig>,
    observer: &mut dyn PairObserver,
    config: PairConfig,
) -> Result<(), SessionError> {
    // --- ReadingFirstRequest ---
    let Some((head, body, tail)) = read_first_request(&mut downstream, config.idle_timeout).await? else {
        return Ok(()); // clean disconnect before any bytes arrived
    };

    let (method, target_raw, version) = match &head.start_line {
        StartLine::Request { method, target, version } => (method.clone(), target.clone(), *version),
        StartLine::Response { .. } => unreachable!("request parser never yields a response start line"),
    };

    let target = downstream::parse_target(&method, &target_raw)?;
    let persistent = downstream::compute_persistent(&head.headers, head.body_length);

    // --- AwaitingUpstream ---
    match target {
        Target::Connect { host, port } => {
            run_connect_tunnel(downstream, host, port, tail, tls_identity, client_tls_config, observer, config)
                .await
        }
        Target::Absolute { scheme, host, port, origin_form } => {
            let mut rewritten_headers = head.headers.clone();
            downstream::strip_hop_by_hop(&mut rewritten_headers);
            if !persistent {
                rewritten_headers.push("Connection", b"close".to_vec());
            }

            let descriptor = RequestDescriptor {
                method: method.clone(),
                target: origin_form.clone(),
                version,
                headers: rewritten_headers.clone(),
                persistent,
                body_length: head.body_length,
            };

            let mut upstream_stream: BoxedStream = Box::new(
                upstream::connect_tcp(&host, port, config.connect_timeout).await?,
            );

            let mut out = downstream::serialize_request_line(&method, &origin_form, version);
            out.extend_from_slice(&downstream::serialize_headers(&rewritten_headers));
            out.extend_from_slice(&body);
            upstream_stream.write_all(&out).await?;

            let url = reconstruct_url(&scheme, &host, port, &descriptor);
            observer.on_request_headers(&descriptor, &url);

            let mut downstream_stream: BoxedStream = Box::new(downstream);
            forward_one_response(&mut downstream_stream, &mut upstream_stream, &method, observer, config.idle_timeout)
                .await?;

            if !persistent {
                return Ok(());
            }

            forwarding_loop(&mut downstream_stream, &mut upstream_stream, tail, &scheme, &host, port, observer, config)
                .await
        }
    }
}

/// Handles the `CONNECT` branch: writes the literal 200 response, terminates
/// TLS as a server using a minted leaf cert, TLS-upgrades the upstream
/// socket, then falls into the same `ForwardingHttp` loop plain HTTP uses —
/// the tunnel's first inner request gets no special treatment and is parsed
/// afresh like any other.
#[allow(clippy::too_many_arguments)]
async fn run_connect_tunnel(
    mut downstream: TcpStream,
    host: String,
    port: u16,
    spillover: Vec<u8>,
    tls_identity: Arc<dyn TlsIdentity>,
    client_tls_config: Arc<rustls::ClientConfig>,
    observer: &mut dyn PairObserver,
    config: PairConfig,
) -> Result<(), SessionError> {
    let upstream_tls = upstream::connect_tls(&host, port, config.connect_timeout, client_tls_config).await?;

    downstream
        .write_all(b"HTTP/1.0 200 Connection established\r\n\r\n")
        .await?;

    // A well-behaved client waits for the 200 before starting its TLS
    // handshake, so `spillover` should be empty; either way it belongs to
    // the pre-tunnel plaintext stream and is discarded.
    if !spillover.is_empty() {
        debug!(bytes = spillover.len(), "discarding pre-handshake spillover");
    }

    let tls_config = proxy_tls::server_config(tls_identity, host.clone());
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));
    let downstream_tls = acceptor
        .accept(downstream)
        .await
        .map_err(|e| SessionError::Tls(proxy_core::TlsError::Handshake(e.to_string())))?;

    let mut downstream_stream: BoxedStream = Box::new(downstream_tls);
    let mut upstream_stream = upstream_tls;

    let scheme = "https".to_string();
    forwarding_loop(&mut downstream_stream, &mut upstream_stream, Vec::new(), &scheme, &host, port, observer, config)
        .await
}

/// The unified `ForwardingHttp` loop: alternates reading one request from
/// `downstream` (raw-mirrored to `upstream`, with
/// just enough parsing to report a descriptor+URL) and then its response
/// (raw-mirrored back, buffered for the observer), recomputing `persistent`
/// from each request's own headers until it is `false` or either side hits
/// EOF.
#[allow(clippy::too_many_arguments)]
async fn forwarding_loop(
    downstream: &mut BoxedStream,
    upstream: &mut BoxedStream,
    mut leftover: Vec<u8>,
    scheme: &str,
    host: &str,
    port: u16,
    observer: &mut dyn PairObserver,
    config: PairConfig,
) -> Result<(), SessionError> {
    loop {
        let Some((head, tail)) =
            forward_one_request(downstream, upstream, leftover, scheme, host, port, observer, config.idle_timeout)
                .await?
        else {
            return Ok(()); // clean EOF at a request boundary
        };
        leftover = tail;

        let method = match &head.start_line {
            StartLine::Request { method, .. } => method.clone(),
            StartLine::Response { .. } => unreachable!(),
        };
        let persistent = downstream::compute_persistent(&head.headers, head.body_length);

        forward_one_response(downstream, upstream, &method, observer, config.idle_timeout).await?;

        if !persistent {
            return Ok(());
        }
    }
}

/// Parses+forwards exactly one request from `downstream` to `upstream`,
/// starting from already-buffered `leftover` bytes. Returns `None` on a
/// clean EOF before any bytes of a new request arrive.
#[allow(clippy::too_many_arguments)]
async fn forward_one_request(
    downstream: &mut BoxedStream,
    upstream: &mut BoxedStream,
    leftover: Vec<u8>,
    scheme: &str,
    host: &str,
    port: u16,
    observer: &mut dyn PairObserver,
    idle_timeout: Duration,
) -> Result<Option<(MessageHead, Vec<u8>)>, SessionError> {
    let mut parser = MessageParser::new_request();
    let mut sink = ForwardingSink::default();

    if !leftover.is_empty() {
        parser.feed(&leftover, &mut sink)?;
    }

    let mut buf = [0u8; READ_CHUNK];
    loop {
        if !sink.out.is_empty() {
            upstream.write_all(&sink.out).await?;
            sink.out.clear();
        }
        if parser.is_done() {
            break;
        }
        let n = with_idle_timeout(idle_timeout, downstream.read(&mut buf)).await?;
        if n == 0 {
            if !sink.started {
                return Ok(None);
            }
            return Err(SessionError::ClientProtocol(proxy_core::ParseError::TruncatedBody));
        }
        parser.feed(&buf[..n], &mut sink)?;
    }

    let head = parser.head().expect("parser reports done only after a full head").clone();
    let descriptor = build_request_descriptor(&head);
    let url = reconstruct_url(scheme, host, port, &descriptor);
    observer.on_request_headers(&descriptor, &url);

    Ok(Some((head, sink.tail)))
}

/// Parses+forwards exactly one response from `upstream` to `downstream`,
/// buffering its body (bounded) for the observer.
async fn forward_one_response(
    downstream: &mut BoxedStream,
    upstream: &mut BoxedStream,
    request_method: &str,
    observer: &mut dyn PairObserver,
    idle_timeout: Duration,
) -> Result<(), SessionError> {
    let mut parser = MessageParser::new_response(request_method);
    let mut sink = ResponseSink::default();
    let mut truncation = None;

    let mut buf = [0u8; READ_CHUNK];
    loop {
        if !sink.out.is_empty() {
            downstream.write_all(&sink.out).await?;
            sink.out.clear();
        }
        if parser.is_done() {
            break;
        }
        let n = with_idle_timeout(idle_timeout, upstream.read(&mut buf)).await?;
        if n == 0 {
            if parser.finish_at_eof(&mut sink).is_err() {
                sink.truncated = true;
                truncation = Some(SessionError::BodyTruncation);
            }
            break;
        }
        if let Err(e) = parser.feed(&buf[..n], &mut sink) {
            if !sink.out.is_empty() {
                downstream.write_all(&sink.out).await?;
            }
            return Err(SessionError::UpstreamProtocol(e));
        }
    }
    if !sink.out.is_empty() {
        downstream.write_all(&sink.out).await?;
    }

    // Per spec.md's BodyTruncation policy, the sink still gets whatever was
    // captured (with `truncated = true`) before the pair closes — it does
    // not unwind past this notification.
    if let Some(head) = parser.head() {
        let descriptor = build_response_descriptor(head);
        observer.on_response_headers(&descriptor);
        for chunk in &sink.body_chunks {
            observer.on_response_body_chunk(chunk);
        }
    }
    observer.on_response_complete(sink.truncated);

    if let Some(err) = truncation {
        return Err(err);
    }
    Ok(())
}

fn build_request_descriptor(head: &MessageHead) -> RequestDescriptor {
    let (method, target, version) = match &head.start_line {
        StartLine::Request { method, target, version } => (method.clone(), target.clone(), *version),
        StartLine::Response { .. } => unreachable!(),
    };
    let persistent = downstream::compute_persistent(&head.headers, head.body_length);
    RequestDescriptor {
        method,
        target,
        version,
        headers: head.headers.clone(),
        persistent,
        body_length: head.body_length,
    }
}

fn build_response_descriptor(head: &MessageHead) -> ResponseDescriptor {
    let (version, status, reason) = match &head.start_line {
        StartLine::Response { version, status, reason } => (*version, *status, reason.clone()),
        StartLine::Request { .. } => unreachable!(),
    };
    ResponseDescriptor {
        status,
        reason,
        version,
        headers: head.headers.clone(),
        body_length: head.body_length,
    }
}

/// Caps the amount of response body buffered for the observer.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Reads the first request off a freshly accepted socket. Returns `None` on
/// a clean EOF before any byte of a request arrives (a client that connects
/// and disconnects without sending anything); any later EOF mid-message is
/// `SessionError::ClientProtocol(TruncatedBody)`.
async fn read_first_request(
    downstream: &mut TcpStream,
    idle_timeout: Duration,
) -> Result<Option<(MessageHead, Vec<u8>, Vec<u8>)>, SessionError> {
    let mut parser = MessageParser::new_request();
    let mut sink = FirstRequestSink::default();
    let mut buf = [0u8; READ_CHUNK];

    while !parser.is_done() {
        let n = with_idle_timeout(idle_timeout, downstream.read(&mut buf)).await?;
        if n == 0 {
            if !sink.started {
                return Ok(None);
            }
            return Err(SessionError::ClientProtocol(proxy_core::ParseError::TruncatedBody));
        }
        parser.feed(&buf[..n], &mut sink)?;
    }

    let head = parser.head().expect("parser reports done only after a full head").clone();
    Ok(Some((head, sink.body, sink.tail)))
}

async fn with_idle_timeout<T>(
    idle_timeout: Duration,
    fut: impl std::future::Future<Output = std::io::Result<T>>,
) -> Result<T, SessionError> {
    match tokio::time::timeout(idle_timeout, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(SessionError::Io(e)),
        Err(_) => Err(SessionError::IdleTimeout),
    }
}

/// Collects the first request's body (post-headers raw bytes), leaving
/// headers/start-line unused here since they're rewritten from the parsed
/// `MessageHead` rather than mirrored verbatim.
#[derive(Default)]
struct FirstRequestSink {
    started: bool,
    headers_done: bool,
    body: Vec<u8>,
    tail: Vec<u8>,
}

impl MessageSink for FirstRequestSink {
    fn on_start_line(&mut self, _raw: &[u8]) {
        self.started = true;
    }
    fn on_headers_complete(&mut self, _head: &MessageHead) {
        self.headers_done = true;
    }
    fn on_raw_bytes(&mut self, bytes: &[u8]) {
        if self.headers_done {
            self.body.extend_from_slice(bytes);
        }
    }
    fn on_message_complete(&mut self, tail: &[u8]) {
        self.tail = tail.to_vec();
    }
}

/// Mirrors every byte verbatim to `out` — used for subsequent/tunnelled
/// requests, which are raw-mirrored with no rewriting.
#[derive(Default)]
struct ForwardingSink {
    started: bool,
    out: Vec<u8>,
    tail: Vec<u8>,
}

impl MessageSink for ForwardingSink {
    fn on_start_line(&mut self, _raw: &[u8]) {
        self.started = true;
    }
    fn on_raw_bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }
    fn on_message_complete(&mut self, tail: &[u8]) {
        self.tail = tail.to_vec();
    }
}

/// Mirrors response bytes verbatim downstream via `on_raw_bytes` while
/// separately buffering the *logical* body (bounded by `MAX_BODY_SIZE`) for
/// the observer via `on_body_bytes` — for chunked responses these two differ,
/// since `on_raw_bytes` also sees chunk-size lines, CRLFs and the trailer.
#[derive(Default)]
struct ResponseSink {
    out: Vec<u8>,
    body_chunks: Vec<Vec<u8>>,
    body_buffered: usize,
    truncated: bool,
}

impl MessageSink for ResponseSink {
    fn on_raw_bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }
    fn on_body_bytes(&mut self, bytes: &[u8]) {
        if self.body_buffered >= MAX_BODY_SIZE {
            self.truncated = true;
            return;
        }
        let remaining = MAX_BODY_SIZE - self.body_buffered;
        let take = remaining.min(bytes.len());
        self.body_buffered += take;
        self.body_chunks.push(bytes[..take].to_vec());
        if take < bytes.len() {
            self.truncated = true;
        }
    }
}
