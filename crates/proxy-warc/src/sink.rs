//! `WarcSink`: a `RecordSink` that appends WARC/1.0 records to a file,
//! gzip-member-framed when the output path ends in `.gz`, preceded by a
//! `warcinfo` preamble record.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::write::GzEncoder;
use flate2::Compression;
use proxy_core::{RecordSink, RequestDescriptor, ResponseDescriptor, SinkError};
use tracing::debug;

use crate::record::WarcRecord;

const SOFTWARE: &str = concat!("warcproxy/", env!("CARGO_PKG_VERSION"));

pub struct WarcSink {
    file: Mutex<File>,
    gzip: bool,
    next_id: AtomicU64,
}

impl WarcSink {
    /// Opens (truncating) `path` and writes the `warcinfo` preamble record
    /// before returning, so every subsequent `write` call only ever appends
    /// `response` records.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let gzip = path.extension().is_some_and(|ext| ext == "gz")
            || path.to_string_lossy().ends_with(".gz");
        let file = File::create(path).map_err(|e| SinkError::Open(e.to_string()))?;
        let sink = Self {
            file: Mutex::new(file),
            gzip,
            next_id: AtomicU64::new(1),
        };
        let warcinfo = WarcRecord::warcinfo(sink.next_record_id(), now_iso8601(), SOFTWARE);
        sink.append(&warcinfo)?;
        Ok(sink)
    }

    fn next_record_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{:08x}-warcproxy-{:016x}", n, now_nanos())
    }

    fn append(&self, record: &WarcRecord) -> Result<(), SinkError> {
        let bytes = record.to_bytes();
        let mut file = self.file.lock().expect("warc output file mutex poisoned");
        if self.gzip {
            let mut encoder = GzEncoder::new(&mut *file, Compression::default());
            encoder
                .write_all(&bytes)
                .map_err(|e| SinkError::Write(e.to_string()))?;
            encoder.finish().map_err(|e| SinkError::Write(e.to_string()))?;
        } else {
            file.write_all(&bytes)
                .map_err(|e| SinkError::Write(e.to_string()))?;
        }
        Ok(())
    }
}

impl RecordSink for WarcSink {
    fn write(
        &self,
        _request: &RequestDescriptor,
        response: &ResponseDescriptor,
        url: &str,
        body: &[u8],
        truncated: bool,
    ) -> Result<(), SinkError> {
        let record = WarcRecord::response(
            self.next_record_id(),
            now_iso8601(),
            url.to_string(),
            response,
            body,
        );
        if truncated {
            debug!(url, "writing truncated WARC response record");
        }
        self.append(&record)
    }
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
