//! Bridges the generic `PairObserver` capability into a `RecordSink` write,
//! accumulating one pending exchange per connection and flushing it once the
//! response completes.

use std::sync::Arc;

use proxy_core::{ObserverFactory, PairObserver, RecordSink, RequestDescriptor, ResponseDescriptor};
use tracing::warn;

pub struct WarcObserverFactory {
    sink: Arc<dyn RecordSink>,
}

impl WarcObserverFactory {
    pub fn new(sink: Arc<dyn RecordSink>) -> Self {
        Self { sink }
    }
}

impl ObserverFactory for WarcObserverFactory {
    fn create(&self) -> Box<dyn PairObserver> {
        Box::new(WarcObserver {
            sink: self.sink.clone(),
            pending: None,
        })
    }
}

struct PendingExchange {
    request: RequestDescriptor,
    url: String,
    response: Option<ResponseDescriptor>,
    body: Vec<u8>,
}

/// One instance per pair, accumulating the in-flight request/response until
/// `on_response_complete` emits a single record.
struct WarcObserver {
    sink: Arc<dyn RecordSink>,
    pending: Option<PendingExchange>,
}

impl PairObserver for WarcObserver {
    fn on_request_headers(&mut self, request: &RequestDescriptor, url: &str) {
        self.pending = Some(PendingExchange {
            request: request.clone(),
            url: url.to_string(),
            response: None,
            body: Vec::new(),
        });
    }

    fn on_response_headers(&mut self, response: &ResponseDescriptor) {
        if let Some(exchange) = &mut self.pending {
            exchange.response = Some(response.clone());
        }
    }

    fn on_response_body_chunk(&mut self, bytes: &[u8]) {
        let Some(exchange) = &mut self.pending else {
            return;
        };
        // The body arriving here is already bounded by the pair
        // coordinator's own buffering cap, so this just accumulates
        // whatever it was handed rather than re-capping it a second time.
        exchange.body.extend_from_slice(bytes);
    }

    fn on_response_complete(&mut self, truncated: bool) {
        let Some(exchange) = self.pending.take() else {
            return;
        };
        let Some(response) = exchange.response else {
            return;
        };
        let result = self.sink.write(&exchange.request, &response, &exchange.url, &exchange.body, truncated);
        if let Err(e) = result {
            warn!(error = %e, url = %exchange.url, "failed to write WARC record");
        }
    }
}
