//! WARC journaling: the `RecordSink` implementation and the `PairObserver`
//! glue that feeds it from the proxy engine.

pub mod observer;
pub mod record;
pub mod sink;

pub use observer::WarcObserverFactory;
pub use proxy_core::reconstruct_url;
pub use record::WarcRecord;
pub use sink::WarcSink;
