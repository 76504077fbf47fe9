use crate::descriptor::{RequestDescriptor, ResponseDescriptor};
use crate::error::SinkError;

/// Process-wide journal of observed request/response pairs.
/// Implementations must serialise their own writes internally; pairs submit
/// records without external synchronisation.
pub trait RecordSink: Send + Sync {
    /// `url` is the fully reconstructed absolute URL.
    /// `body` is the raw response body bytes captured while forwarding,
    /// possibly `truncated` if it exceeded the buffering cap.
    fn write(
        &self,
        request: &RequestDescriptor,
        response: &ResponseDescriptor,
        url: &str,
        body: &[u8],
        truncated: bool,
    ) -> Result<(), SinkError>;
}

/// A sink that discards every record. Used when no `--file` journal is
/// configured.
pub struct NoopSink;

impl RecordSink for NoopSink {
    fn write(
        &self,
        _request: &RequestDescriptor,
        _response: &ResponseDescriptor,
        _url: &str,
        _body: &[u8],
        _truncated: bool,
    ) -> Result<(), SinkError> {
        Ok(())
    }
}
