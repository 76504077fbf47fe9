//! Shared data model and capability traits for the `warcproxy` engine.
//!
//! This crate has no networking or TLS code of its own: it defines the
//! request/response descriptors, header list, and the `RecordSink` /
//! `TlsIdentity` / `PairObserver` traits that the rest of the workspace is
//! built against.

pub mod descriptor;
pub mod error;
pub mod header;
pub mod observer;
pub mod sink;
pub mod tls;
pub mod url;

pub use descriptor::{BodyLength, HttpVersion, RequestDescriptor, ResponseDescriptor};
pub use error::{ParseError, SessionError, SinkError, TlsError};
pub use header::{HeaderField, HeaderList};
pub use observer::{NoopObserver, NoopObserverFactory, ObserverFactory, PairObserver};
pub use sink::{NoopSink, RecordSink};
pub use tls::{CertifiedKeyDer, TlsIdentity};
pub use url::reconstruct_url;
