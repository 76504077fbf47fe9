//! Single-message HTTP/1.1 parser.
//!
//! Instantiated once per request or response. Tokenises the start line and
//! headers, decides the body framing once headers complete, and forwards
//! every consumed byte verbatim (normalising only line terminators in the
//! start-line/header block) via `on_raw_bytes`.

use proxy_core::{BodyLength, HeaderField, HeaderList, HttpVersion, ParseError};

use crate::chunked::{ChunkedDecoder, ChunkedSink};

/// Which kind of message this parser instance tokenises. Responses need to
/// know the request method to interpret framing (e.g. HEAD responses never
/// carry a body).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

/// The request or response start line, parsed but not yet combined with its
/// headers into a full descriptor (that's `proxy-core::{RequestDescriptor,
/// ResponseDescriptor}`, built by the session layer once `persistent` is
/// known).
#[derive(Debug, Clone)]
pub enum StartLine {
    Request {
        method: String,
        target: String,
        version: HttpVersion,
    },
    Response {
        version: HttpVersion,
        status: u16,
        reason: String,
    },
}

/// Parsed structure handed to `on_headers_complete`, after the full header
/// block has already been mirrored via `on_raw_bytes`.
#[derive(Debug, Clone)]
pub struct MessageHead {
    pub start_line: StartLine,
    pub headers: HeaderList,
    pub body_length: BodyLength,
}

/// Parser state. `BodyChunked` owns the chunked sub-decoder directly.
enum ParserState {
    AwaitingStartLine,
    AwaitingHeaders,
    BodyLength(u64),
    BodyChunked(ChunkedDecoder),
    BodyUntilClose,
    Done,
}

/// Callback surface for `MessageParser::feed`.
pub trait MessageSink {
    /// Fired once, after the first CRLF (or bare LF).
    fn on_start_line(&mut self, _raw: &[u8]) {}
    /// Fired for every header line, as received, before folding.
    fn on_header_line(&mut self, _raw: &[u8]) {}
    /// Fired once, with the fully parsed structure. By the time this fires
    /// the whole header block has already gone through `on_raw_bytes`.
    fn on_headers_complete(&mut self, _head: &MessageHead) {}
    /// Fired continuously for every byte consumed, in order, regardless of
    /// mode. This is the hook the proxy uses to mirror bytes to the
    /// opposite peer.
    fn on_raw_bytes(&mut self, bytes: &[u8]);
    /// Fired only for logical body payload, with all framing stripped: for
    /// fixed-length and until-close bodies this is the same bytes as
    /// `on_raw_bytes`; for chunked bodies it excludes the chunk-size lines,
    /// CRLFs and trailer that `on_raw_bytes` still sees. Default no-op for
    /// sinks that only need the raw wire mirror.
    fn on_body_bytes(&mut self, _bytes: &[u8]) {}
    /// Fired exactly once when framing says the message is over; `tail`
    /// holds bytes belonging to the next message.
    fn on_message_complete(&mut self, _tail: &[u8]) {}
}

/// A single-message, resumable HTTP/1.1 parser.
pub struct MessageParser {
    kind: MessageKind,
    /// For responses: the method of the request this answers, needed to
    /// decide framing.
    request_method: Option<String>,
    state: ParserState,
    buf: Vec<u8>,
    start_line: Option<StartLine>,
    pending_headers: Vec<HeaderField>,
    head: Option<MessageHead>,
}

impl MessageParser {
    pub fn new_request() -> Self {
        Self::new(MessageKind::Request, None)
    }

    pub fn new_response(request_method: &str) -> Self {
        Self::new(MessageKind::Response, Some(request_method.to_ascii_uppercase()))
    }

    /// Constructs a response parser that begins directly in body mode,
    /// skipping start-line/header tokenisation because the caller already
    /// has a fully parsed `MessageHead` in hand.
    pub fn new_response_prefilled(request_method: &str, head: MessageHead) -> Self {
        let state = match head.body_length {
            BodyLength::Fixed(0) => ParserState::Done,
            BodyLength::Fixed(n) => ParserState::BodyLength(n),
            BodyLength::Chunked => ParserState::BodyChunked(ChunkedDecoder::new()),
            BodyLength::UntilClose => ParserState::BodyUntilClose,
        };
        Self {
            kind: MessageKind::Response,
            request_method: Some(request_method.to_ascii_uppercase()),
            state,
            buf: Vec::new(),
            start_line: Some(head.start_line.clone()),
            pending_headers: Vec::new(),
            head: Some(head),
        }
    }

    fn new(kind: MessageKind, request_method: Option<String>) -> Self {
        Self {
            kind,
            request_method,
            state: ParserState::AwaitingStartLine,
            buf: Vec::new(),
            start_line: None,
            pending_headers: Vec::new(),
            head: None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, ParserState::Done)
    }

    pub fn is_awaiting_close(&self) -> bool {
        matches!(self.state, ParserState::BodyUntilClose)
    }

    pub fn head(&self) -> Option<&MessageHead> {
        self.head.as_ref()
    }

    /// Feed more bytes from the stream, delivering parse events to `sink`.
    pub fn feed(&mut self, input: &[u8], sink: &mut dyn MessageSink) -> Result<(), ParseError> {
        // Once in chunked-body mode, `self.buf` is always left empty by the
        // transition below, so every later `feed` call goes straight to the
        // sub-machine rather than through the line-oriented loop.
        if let ParserState::BodyChunked(ref mut decoder) = self.state {
            let mut adapter = ChunkedToMessageAdapter { sink, tail: None };
            decoder.feed(input, &mut adapter)?;
            if let Some(tail) = adapter.tail {
                self.state = ParserState::Done;
                sink.on_message_complete(&tail);
            }
            return Ok(());
        }

        self.buf.extend_from_slice(input);

        loop {
            match self.state {
                ParserState::Done => return Ok(()),
                ParserState::AwaitingStartLine => {
                    let Some(line_end) = find_lf(&self.buf) else {
                        return Ok(());
                    };
                    let consumed = line_end + 1;
                    let raw_line = self.buf[..line_end].to_vec();
                    let content = strip_trailing_cr(&raw_line);
                    sink.on_start_line(&content);
                    self.start_line = Some(parse_start_line(&content, self.kind)?);
                    emit_normalised_line(&content, sink);
                    self.buf.drain(..consumed);
                    self.state = ParserState::AwaitingHeaders;
                }
                ParserState::AwaitingHeaders => {
                    let Some(line_end) = find_lf(&self.buf) else {
                        return Ok(());
                    };
                    let consumed = line_end + 1;
                    let raw_line = self.buf[..line_end].to_vec();
                    let content = strip_trailing_cr(&raw_line);
                    if content.is_empty() {
                        sink.on_raw_bytes(b"\r\n");
                        self.buf.drain(..consumed);
                        let head = self.finalize_headers()?;
                        let next_state = match head.body_length {
                            BodyLength::Fixed(0) => ParserState::Done,
                            BodyLength::Fixed(n) => ParserState::BodyLength(n),
                            BodyLength::Chunked => ParserState::BodyChunked(ChunkedDecoder::new()),
                            BodyLength::UntilClose => ParserState::BodyUntilClose,
                        };
                        sink.on_headers_complete(&head);
                        self.head = Some(head);
                        self.state = next_state;
                        if matches!(self.state, ParserState::Done) {
                            let tail = std::mem::take(&mut self.buf);
                            sink.on_message_complete(&tail);
                            return Ok(());
                        }
                        if let ParserState::BodyChunked(ref mut decoder) = self.state {
                            let remainder = std::mem::take(&mut self.buf);
                            if !remainder.is_empty() {
                                let mut adapter = ChunkedToMessageAdapter { sink, tail: None };
                                decoder.feed(&remainder, &mut adapter)?;
                                if let Some(tail) = adapter.tail {
                                    self.state = ParserState::Done;
                                    sink.on_message_complete(&tail);
                                }
                            }
                            return Ok(());
                        }
                    } else {
                        sink.on_header_line(&content);
                        self.pending_headers.push(parse_header_line(&content)?);
                        emit_normalised_line(&content, sink);
                        self.buf.drain(..consumed);
                    }
                }
                ParserState::BodyLength(remaining) => {
                    if self.buf.is_empty() {
                        return Ok(());
                    }
                    let n = (remaining as usize).min(self.buf.len());
                    sink.on_raw_bytes(&self.buf[..n]);
                    sink.on_body_bytes(&self.buf[..n]);
                    self.buf.drain(..n);
                    let remaining = remaining - n as u64;
                    if remaining == 0 {
                        self.state = ParserState::Done;
                        let tail = std::mem::take(&mut self.buf);
                        sink.on_message_complete(&tail);
                        return Ok(());
                    }
                    self.state = ParserState::BodyLength(remaining);
                    return Ok(());
                }
                ParserState::BodyChunked(_) => unreachable!("handled above before entering the loop"),
                ParserState::BodyUntilClose => {
                    if !self.buf.is_empty() {
                        let bytes = std::mem::take(&mut self.buf);
                        sink.on_raw_bytes(&bytes);
                        sink.on_body_bytes(&bytes);
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Called when the socket reaches EOF. For `BodyUntilClose` this is the
    /// normal way the message ends; for any other non-`Done` state it means
    /// the body was truncated.
    pub fn finish_at_eof(&mut self, sink: &mut dyn MessageSink) -> Result<(), ParseError> {
        match self.state {
            ParserState::BodyUntilClose => {
                self.state = ParserState::Done;
                sink.on_message_complete(&[]);
                Ok(())
            }
            ParserState::Done => Ok(()),
            _ => Err(ParseError::TruncatedBody),
        }
    }

    fn finalize_headers(&mut self) -> Result<MessageHead, ParseError> {
        let headers = HeaderList(std::mem::take(&mut self.pending_headers));
        let body_length = self.decide_body_length(&headers)?;
        Ok(MessageHead {
            start_line: self.start_line.clone().expect("start line parsed before headers"),
            headers,
            body_length,
        })
    }

    fn decide_body_length(&self, headers: &HeaderList) -> Result<BodyLength, ParseError> {
        match self.kind {
            MessageKind::Request => {
                if headers.contains_token("Transfer-Encoding", "chunked") {
                    return Ok(BodyLength::Chunked);
                }
                match extract_content_length(headers)? {
                    Some(n) => Ok(BodyLength::Fixed(n)),
                    None => Ok(BodyLength::Fixed(0)),
                }
            }
            MessageKind::Response => {
                let status = match self.start_line.as_ref().expect("start line set") {
                    StartLine::Response { status, .. } => *status,
                    StartLine::Request { .. } => unreachable!("response parser always has a response start line"),
                };
                let is_head = self.request_method.as_deref() == Some("HEAD");
                if is_head || (100..200).contains(&status) || status == 204 || status == 304 {
                    return Ok(BodyLength::Fixed(0));
                }
                if headers.contains_token("Transfer-Encoding", "chunked") {
                    return Ok(BodyLength::Chunked);
                }
                match extract_content_length(headers)? {
                    Some(n) => Ok(BodyLength::Fixed(n)),
                    None => Ok(BodyLength::UntilClose),
                }
            }
        }
    }
}

struct ChunkedToMessageAdapter<'a> {
    sink: &'a mut dyn MessageSink,
    tail: Option<Vec<u8>>,
}

impl<'a> ChunkedSink for ChunkedToMessageAdapter<'a> {
    fn on_bytes(&mut self, bytes: &[u8]) {
        self.sink.on_raw_bytes(bytes);
    }

    fn on_payload(&mut self, bytes: &[u8]) {
        self.sink.on_body_bytes(bytes);
    }

    fn on_finished(&mut self, tail: &[u8]) {
        self.tail = Some(tail.to_vec());
    }
}

fn emit_normalised_line(content: &[u8], sink: &mut dyn MessageSink) {
    let mut normalised = Vec::with_capacity(content.len() + 2);
    normalised.extend_from_slice(content);
    normalised.extend_from_slice(b"\r\n");
    sink.on_raw_bytes(&normalised);
}

fn find_lf(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

fn strip_trailing_cr(line: &[u8]) -> Vec<u8> {
    if line.last() == Some(&b'\r') {
        line[..line.len() - 1].to_vec()
    } else {
        line.to_vec()
    }
}

fn parse_start_line(line: &[u8], kind: MessageKind) -> Result<StartLine, ParseError> {
    let s = std::str::from_utf8(line)
        .map_err(|_| ParseError::MalformedStartLine("non-UTF-8 start line".into()))?;
    match kind {
        MessageKind::Request => {
            let mut parts = s.splitn(3, ' ');
            let method = parts.next().filter(|p| !p.is_empty());
            let target = parts.next();
            let version = parts.next();
            let (Some(method), Some(target), Some(version)) = (method, target, version) else {
                return Err(ParseError::MalformedStartLine(s.to_string()));
            };
            Ok(StartLine::Request {
                method: method.to_string(),
                target: target.to_string(),
                version: parse_version(version)?,
            })
        }
        MessageKind::Response => {
            let mut parts = s.splitn(3, ' ');
            let version = parts.next();
            let status = parts.next();
            let reason = parts.next().unwrap_or("");
            let (Some(version), Some(status)) = (version, status) else {
                return Err(ParseError::MalformedStartLine(s.to_string()));
            };
            let status: u16 = status
                .parse()
                .map_err(|_| ParseError::MalformedStartLine(s.to_string()))?;
            Ok(StartLine::Response {
                version: parse_version(version)?,
                status,
                reason: reason.to_string(),
            })
        }
    }
}

fn parse_version(s: &str) -> Result<HttpVersion, ParseError> {
    HttpVersion::parse(s).ok_or_else(|| ParseError::MalformedStartLine(format!("unknown version {s}")))
}

fn parse_header_line(line: &[u8]) -> Result<HeaderField, ParseError> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| ParseError::MalformedHeader(String::from_utf8_lossy(line).into_owned()))?;
    let name = std::str::from_utf8(&line[..colon])
        .map_err(|_| ParseError::MalformedHeader("non-UTF-8 header name".into()))?
        .to_string();
    let mut value = &line[colon + 1..];
    while matches!(value.first(), Some(b' ') | Some(b'\t')) {
        value = &value[1..];
    }
    Ok(HeaderField {
        name,
        value: value.to_vec(),
    })
}

fn extract_content_length(headers: &HeaderList) -> Result<Option<u64>, ParseError> {
    let values: Vec<_> = headers.get_all("Content-Length").collect();
    if values.is_empty() {
        return Ok(None);
    }
    let parse_one = |v: &[u8]| -> Result<u64, ParseError> {
        std::str::from_utf8(v)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| ParseError::MalformedHeader(format!("invalid Content-Length: {v:?}")))
    };
    let first = parse_one(&values[0].value)?;
    for extra in &values[1..] {
        if parse_one(&extra.value)? != first {
            return Err(ParseError::ConflictingContentLength);
        }
    }
    Ok(Some(first))
}
