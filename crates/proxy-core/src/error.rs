use thiserror::Error;

/// Failures raised while tokenising an HTTP/1.1 message or a chunked body.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed start line: {0}")]
    MalformedStartLine(String),
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    #[error("duplicate Content-Length header with conflicting values")]
    ConflictingContentLength,
    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(String),
    #[error("missing CRLF after chunk data")]
    MissingChunkCrlf,
    #[error("data received after chunked body finished")]
    DataAfterFinished,
    #[error("connection closed with an incomplete message body")]
    TruncatedBody,
}

/// Error kinds raised by the per-pair session state machines.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("client protocol error: {0}")]
    ClientProtocol(#[from] ParseError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("upstream connect failed: {0}")]
    UpstreamConnect(String),
    #[error("upstream protocol error: {0}")]
    UpstreamProtocol(ParseError),
    #[error("connection closed with an incomplete message body")]
    BodyTruncation,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("idle timeout elapsed")]
    IdleTimeout,
    #[error("connect timeout elapsed")]
    ConnectTimeout,
    #[error("tls error: {0}")]
    Tls(#[from] TlsError),
}

/// Failures from the `TlsIdentity` oracle (CA loading, per-host leaf minting).
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to load CA material: {0}")]
    LoadCa(String),
    #[error("failed to mint certificate for {host}: {reason}")]
    Mint { host: String, reason: String },
    #[error("tls handshake failed: {0}")]
    Handshake(String),
}

/// Failures from the `RecordSink` (WARC writer). These never propagate into
/// the forwarding path; callers log and continue.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open record output: {0}")]
    Open(String),
    #[error("failed to write record: {0}")]
    Write(String),
}
