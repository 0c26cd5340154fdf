//! Transport module - byte streams and socket tuning.
//!
//! Provides:
//! - [`BoxedStream`] - the read/write surface a protocol hands to a connection
//! - [`KeepAlive`] - OS-level TCP keep-alive parameters

mod keepalive;

use tokio::io::{AsyncRead, AsyncWrite};

pub use keepalive::{
    KeepAlive, DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_KEEPALIVE_RETRIES, DEFAULT_KEEPALIVE_TIME,
};

/// A bidirectional async byte stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased stream owned by a connection.
pub type BoxedStream = Box<dyn AsyncStream>;
