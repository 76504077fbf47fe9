use crate::descriptor::{RequestDescriptor, ResponseDescriptor};

/// Notified of the lifecycle of one request/response exchange as it is
/// forwarded. One instance is created per pair and owns it exclusively for
/// the pair's lifetime, accumulating state on `self` as callbacks arrive.
pub trait PairObserver: Send {
    fn on_request_headers(&mut self, _request: &RequestDescriptor, _url: &str) {}
    fn on_response_headers(&mut self, _response: &ResponseDescriptor) {}
    fn on_response_body_chunk(&mut self, _bytes: &[u8]) {}
    /// `truncated` is `true` when the caller stopped buffering the body
    /// before it was fully forwarded (the forwarding itself is still
    /// byte-exact; only what's offered to the observer is capped).
    fn on_response_complete(&mut self, _truncated: bool) {}
}

/// Builds a fresh `PairObserver` for each accepted connection. Shared,
/// process-wide state (e.g. an open WARC file) lives behind the factory and
/// is handed to each observer via an `Arc`.
pub trait ObserverFactory: Send + Sync {
    fn create(&self) -> Box<dyn PairObserver>;
}

pub struct NoopObserver;

impl PairObserver for NoopObserver {}

pub struct NoopObserverFactory;

impl ObserverFactory for NoopObserverFactory {
    fn create(&self) -> Box<dyn PairObserver> {
        Box::new(NoopObserver)
    }
}
