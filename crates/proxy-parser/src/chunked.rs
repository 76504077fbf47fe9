//! Chunked raw decoder.
//!
//! Tokenises `Transfer-Encoding: chunked` framing while re-emitting every
//! byte that belongs to it untouched, so the proxy can mirror the wire
//! bytes to the opposite peer without re-serialising them.

use proxy_core::ParseError;

/// Sub-state of the chunked body state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkState {
    ChunkLength,
    ChunkBody(u64),
    ChunkCrlf,
    Trailer,
    Finished,
}

/// Callback surface for `ChunkedDecoder::feed`. Kept as a trait (rather than
/// two separate `FnMut` closures) so a single mutable borrow of the owning
/// `MessageParser`'s sink can be threaded through without aliasing.
pub trait ChunkedSink {
    /// Fired for every input byte that belongs to the chunked framing (size
    /// lines, CRLFs, chunk payloads, trailer), in order.
    fn on_bytes(&mut self, bytes: &[u8]);

    /// Fired only for chunk payload bytes (the `ChunkBody` state), excluding
    /// size lines, CRLFs and the trailer — i.e. the logical body with all
    /// framing stripped. Default no-op for sinks that only care about the
    /// raw wire mirror.
    fn on_payload(&mut self, _bytes: &[u8]) {}

    /// Fired exactly once when the terminating zero-chunk and its trailer
    /// have been consumed. `tail` is whatever bytes followed it in the same
    /// `feed` call and belongs to the next message.
    fn on_finished(&mut self, tail: &[u8]);
}

/// Decodes one chunked body. Construct a fresh instance per message.
pub struct ChunkedDecoder {
    state: ChunkState,
    buf: Vec<u8>,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            state: ChunkState::ChunkLength,
            buf: Vec::new(),
        }
    }

    pub fn state(&self) -> &ChunkState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, ChunkState::Finished)
    }

    /// Feed more bytes from the stream. Returns an error on malformed
    /// framing or on bytes received after `Finished`.
    pub fn feed(&mut self, input: &[u8], sink: &mut dyn ChunkedSink) -> Result<(), ParseError> {
        self.buf.extend_from_slice(input);
        loop {
            match self.state.clone() {
                ChunkState::Finished => {
                    if !self.buf.is_empty() {
                        return Err(ParseError::DataAfterFinished);
                    }
                    return Ok(());
                }
                ChunkState::ChunkLength => {
                    let Some(line_end) = find_crlf(&self.buf) else {
                        return Ok(());
                    };
                    let consumed = line_end + 2;
                    let size = parse_chunk_size_line(&self.buf[..line_end])?;
                    sink.on_bytes(&self.buf[..consumed]);
                    self.buf.drain(..consumed);
                    self.state = if size == 0 {
                        ChunkState::Trailer
                    } else {
                        ChunkState::ChunkBody(size)
                    };
                }
                ChunkState::ChunkBody(remaining) => {
                    if self.buf.is_empty() {
                        return Ok(());
                    }
                    let n = (remaining as usize).min(self.buf.len());
                    sink.on_bytes(&self.buf[..n]);
                    sink.on_payload(&self.buf[..n]);
                    self.buf.drain(..n);
                    let remaining = remaining - n as u64;
                    self.state = if remaining == 0 {
                        ChunkState::ChunkCrlf
                    } else {
                        ChunkState::ChunkBody(remaining)
                    };
                }
                ChunkState::ChunkCrlf => {
                    if self.buf.len() < 2 {
                        return Ok(());
                    }
                    if &self.buf[..2] != b"\r\n" {
                        return Err(ParseError::MissingChunkCrlf);
                    }
                    sink.on_bytes(&self.buf[..2]);
                    self.buf.drain(..2);
                    self.state = ChunkState::ChunkLength;
                }
                ChunkState::Trailer => {
                    let Some(line_end) = find_crlf(&self.buf) else {
                        return Ok(());
                    };
                    let consumed = line_end + 2;
                    let blank = line_end == 0;
                    sink.on_bytes(&self.buf[..consumed]);
                    self.buf.drain(..consumed);
                    if blank {
                        self.state = ChunkState::Finished;
                        let rest = std::mem::take(&mut self.buf);
                        sink.on_finished(&rest);
                        return Ok(());
                    }
                    // Otherwise this was a trailer header line; keep reading.
                }
            }
        }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// `chunk-size [ ";" chunk-ext ] CRLF`; extensions are ignored.
fn parse_chunk_size_line(line: &[u8]) -> Result<u64, ParseError> {
    let hex_part = match line.iter().position(|&b| b == b';') {
        Some(i) => &line[..i],
        None => line,
    };
    let hex_str = std::str::from_utf8(hex_part)
        .map_err(|_| ParseError::InvalidChunkSize("non-UTF-8 chunk size".into()))?;
    let trimmed = hex_str.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::InvalidChunkSize(hex_str.to_string()));
    }
    u64::from_str_radix(trimmed, 16).map_err(|_| ParseError::InvalidChunkSize(hex_str.to_string()))
}
