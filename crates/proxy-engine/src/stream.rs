//! Unifies plain TCP and TLS-wrapped sockets on both legs so the downstream
//! and upstream session halves can be written against a single concrete
//! type regardless of whether the connection is a `CONNECT` tunnel or
//! plain HTTP.

use tokio::io::{AsyncRead, AsyncWrite};

pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}

pub type BoxedStream = Box<dyn DuplexStream>;
