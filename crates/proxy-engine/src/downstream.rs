//! Downstream (client-facing) session helpers: first-request target
//! parsing, persistence derivation, and hop-by-hop header stripping.

use proxy_core::{BodyLength, HeaderList, HttpVersion, SessionError};

/// What the first request's parsed target resolves to.
#[derive(Debug, Clone)]
pub enum Target {
    /// `CONNECT host:port HTTP/1.1` — the session becomes a TLS tunnel.
    Connect { host: String, port: u16 },
    /// Plain HTTP via an absolute-form target; `origin_form` is the
    /// path+query to rewrite the request line to before forwarding.
    Absolute {
        scheme: String,
        host: String,
        port: u16,
        origin_form: String,
    },
}

/// Names stripped before forwarding in both directions.
/// `Transfer-Encoding` is deliberately absent: it's needed for framing.
const HOP_BY_HOP: &[&str] = &[
    "Proxy-Connection",
    "Proxy-Authenticate",
    "Proxy-Authorization",
    "Connection",
    "Keep-Alive",
    "TE",
    "Trailer",
    "Upgrade",
];

/// Parses the first request's method + request-target. The target MUST be
/// absolute-form or, for `CONNECT`, authority-form;
/// anything else (origin-form, `*`) is a bad request from a forward proxy's
/// client.
pub fn parse_target(method: &str, target: &str) -> Result<Target, SessionError> {
    if method.eq_ignore_ascii_case("CONNECT") {
        let (host, port) = split_authority(target)
            .ok_or_else(|| SessionError::BadRequest(format!("bad CONNECT authority: {target}")))?;
        return Ok(Target::Connect { host, port });
    }

    let url = target
        .parse::<url::Url>()
        .map_err(|_| SessionError::BadRequest(format!("request-target is not absolute-form: {target}")))?;
    let scheme = url.scheme().to_string();
    if scheme != "http" && scheme != "https" {
        return Err(SessionError::BadRequest(format!("unsupported scheme: {scheme}")));
    }
    let host = url
        .host_str()
        .ok_or_else(|| SessionError::BadRequest(format!("absolute-form target has no host: {target}")))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(if scheme == "https" { 443 } else { 80 });

    let mut origin_form = url.path().to_string();
    if origin_form.is_empty() {
        origin_form.push('/');
    }
    if let Some(query) = url.query() {
        origin_form.push('?');
        origin_form.push_str(query);
    }

    Ok(Target::Absolute {
        scheme,
        host,
        port,
        origin_form,
    })
}

fn split_authority(target: &str) -> Option<(String, u16)> {
    let (host, port) = target.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    let port: u16 = port.parse().ok()?;
    Some((host.to_string(), port))
}

/// Derives `persistent` for a request: `false` if any
/// `Connection`/`Proxy-Connection` header contains `close`, OR the request
/// carries a non-zero body (request bodies are not yet streamed with a
/// dedicated body producer); `true` otherwise.
pub fn compute_persistent(headers: &HeaderList, body_length: BodyLength) -> bool {
    if headers.contains_token("Connection", "close") || headers.contains_token("Proxy-Connection", "close") {
        return false;
    }
    !matches!(body_length, BodyLength::Fixed(n) if n > 0) && !matches!(body_length, BodyLength::Chunked)
}

/// Strips hop-by-hop headers, including any header names listed inside a
/// `Connection` header's value, before the list is re-serialized for
/// forwarding.
pub fn strip_hop_by_hop(headers: &mut HeaderList) {
    let mut extra: Vec<String> = headers.tokens("Connection");
    extra.retain(|t| !t.is_empty());
    for name in HOP_BY_HOP {
        headers.remove_all(name);
    }
    for name in extra {
        headers.remove_all(&name);
    }
}

/// Rebuilds a request line from its (possibly rewritten) parts.
pub fn serialize_request_line(method: &str, target: &str, version: HttpVersion) -> Vec<u8> {
    format!("{method} {target} {}\r\n", version.as_str()).into_bytes()
}

/// Rebuilds a header block (each field re-emitted, then the blank line).
pub fn serialize_headers(headers: &HeaderList) -> Vec<u8> {
    let mut out = Vec::new();
    for field in headers.iter() {
        out.extend_from_slice(field.name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(&field.value);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}
