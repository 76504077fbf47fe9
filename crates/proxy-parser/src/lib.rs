//! Hand-rolled, sans-IO HTTP/1.1 tokenisers: a chunked-body sub-decoder and
//! a single-message parser built on top of it. Both re-emit every consumed
//! byte so callers can mirror the wire bytes to the opposite peer instead
//! of re-serialising parsed data.

pub mod chunked;
pub mod message;

pub use chunked::{ChunkState, ChunkedDecoder, ChunkedSink};
pub use message::{MessageHead, MessageKind, MessageParser, MessageSink, StartLine};
