//! WARC/1.0 record framing, including the `warcinfo` preamble record.

use proxy_core::{HeaderList, ResponseDescriptor};

/// One WARC record, already laid out as header lines plus an opaque block.
/// Kept separate from the writer so record construction can be unit tested
/// without touching a file.
pub struct WarcRecord {
    pub warc_type: &'static str,
    pub record_id: String,
    pub date: String,
    pub content_type: &'static str,
    pub target_uri: Option<String>,
    pub block: Vec<u8>,
}

impl WarcRecord {
    pub fn warcinfo(record_id: String, date: String, software: &str) -> Self {
        let block = format!(
            "software: {software}\r\nformat: WARC File Format 1.0\r\n"
        )
        .into_bytes();
        Self {
            warc_type: "warcinfo",
            record_id,
            date,
            content_type: "application/warc-fields",
            target_uri: None,
            block,
        }
    }

    pub fn response(
        record_id: String,
        date: String,
        url: String,
        response: &ResponseDescriptor,
        body: &[u8],
    ) -> Self {
        let mut block = serialize_response_head(response);
        block.extend_from_slice(body);
        Self {
            warc_type: "response",
            record_id,
            date,
            content_type: "application/http;msgtype=response",
            target_uri: Some(url),
            block,
        }
    }

    /// Serializes this record's header block and its content block, exactly
    /// as written to the output stream (before any gzip framing).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.block.len() + 256);
        out.extend_from_slice(b"WARC/1.0\r\n");
        out.extend_from_slice(format!("WARC-Type: {}\r\n", self.warc_type).as_bytes());
        out.extend_from_slice(format!("WARC-Record-ID: <urn:uuid:{}>\r\n", self.record_id).as_bytes());
        out.extend_from_slice(format!("WARC-Date: {}\r\n", self.date).as_bytes());
        if let Some(uri) = &self.target_uri {
            out.extend_from_slice(format!("WARC-Target-URI: {uri}\r\n").as_bytes());
        }
        out.extend_from_slice(format!("Content-Type: {}\r\n", self.content_type).as_bytes());
        out.extend_from_slice(format!("Content-Length: {}\r\n", self.block.len()).as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.block);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }
}

/// Reconstructs the response's status line and headers for the WARC block,
/// mirroring the bytes the client actually received (request headers are
/// available separately via the request descriptor if a future revision
/// wants a paired `request` record; only one `response` record is emitted
/// per exchange).
fn serialize_response_head(response: &ResponseDescriptor) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(
        format!(
            "{} {} {}\r\n",
            response.version.as_str(),
            response.status,
            response.reason
        )
        .as_bytes(),
    );
    push_headers(&mut out, &response.headers);
    out.extend_from_slice(b"\r\n");
    out
}

fn push_headers(out: &mut Vec<u8>, headers: &HeaderList) {
    for header in headers {
        out.extend_from_slice(header.name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(&header.value);
        out.extend_from_slice(b"\r\n");
    }
}
