//! Protocol module - socket creation, framing, and connection hooks.
//!
//! A [`Protocol`] is an immutable descriptor shared by every connection of an
//! endpoint. Mutable decode state lives in a [`Decoder`] that the protocol
//! builds fresh for each connection, so partial frames never leak between
//! connections.
//!
//! Provided variants:
//! - [`LengthPrefixProtocol`] - `len ‖ payload`, u16 or u32 little-endian prefix
//! - [`DelimiterProtocol`] - `payload ‖ delimiter`
//! - [`PlainProtocol`] - no framing, every read is one message
//!
//! Datagram or secured transports plug in by implementing [`Protocol`] and
//! overriding [`Protocol::create_socket`] or [`Protocol::wrap_stream`].

mod delimiter;
mod length_prefix;
mod plain;

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;

use crate::connection::{self, Connection};
use crate::error::Result;
use crate::server::{self, Server};
use crate::transport::BoxedStream;

pub use delimiter::{DelimiterDecoder, DelimiterProtocol, DEFAULT_DELIMITER, DEFAULT_MAX_DELIMITED_SIZE};
pub use length_prefix::{
    LengthPrefixDecoder, LengthPrefixProtocol, PrefixWidth, DEFAULT_MAX_LARGE_MESSAGE_SIZE,
};
pub use plain::{PlainDecoder, PlainProtocol, DEFAULT_PLAIN_BUFFER_SIZE};

/// Default size of the per-connection read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Boxed future used by the object-safe protocol hooks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Which side of a connection a stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The side that called `connect`.
    Client,
    /// The side that accepted the connection.
    Server,
}

/// Per-connection frame decoder.
///
/// Receives raw bytes in whatever chunks the stream delivers and returns
/// every complete message payload, buffering partial data internally.
pub trait Decoder: Send + 'static {
    /// Feed `data` and append every complete message to `out`.
    ///
    /// An error means the stream can no longer be framed and the
    /// connection must be closed. Messages completed before the bad frame
    /// are still appended to `out`.
    fn decode(&mut self, data: &[u8], out: &mut Vec<Bytes>) -> Result<()>;

    /// Push data into the decoder and extract all complete messages.
    ///
    /// Convenience over [`Decoder::decode`] that drops the messages
    /// completed before an error.
    fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        let mut out = Vec::new();
        self.decode(data, &mut out)?;
        Ok(out)
    }

    /// Number of buffered bytes not yet part of a complete message.
    fn buffered(&self) -> usize;
}

/// Transport and framing strategy.
pub trait Protocol: Send + Sync + 'static {
    /// Build the exact wire bytes for a message made of one or more segments.
    ///
    /// Must be invertible by this protocol's [`Decoder`].
    fn frame(&self, parts: &[&[u8]]) -> Result<Bytes>;

    /// Create fresh decode state for a new connection.
    fn decoder(&self) -> Box<dyn Decoder>;

    /// Size of the buffer the receive loop reads into.
    fn read_buffer_size(&self) -> usize {
        DEFAULT_READ_BUFFER_SIZE
    }

    /// Create a new unconnected socket for `addr`'s address family.
    fn create_socket(&self, addr: &SocketAddr) -> Result<TcpSocket> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        Ok(socket)
    }

    /// Turn a connected socket into the byte stream used for reads and writes.
    ///
    /// Override to add a transport layer such as TLS.
    fn wrap_stream(&self, stream: TcpStream, _role: Role) -> BoxFuture<'static, Result<BoxedStream>> {
        Box::pin(async move { Ok(Box::new(stream) as BoxedStream) })
    }

    /// Start accepting connections on a bound, listening socket.
    fn start_accepting(&self, listener: TcpListener, server: Server) -> JoinHandle<()> {
        server::spawn_accept_loop(listener, server)
    }

    /// Start the receive loop of `conn` if it is not running yet.
    fn ensure_receiving(&self, conn: &Connection) {
        connection::spawn_receive_loop(conn);
    }

    /// Write already-framed bytes to the connection.
    fn send<'a>(&'a self, conn: &'a Connection, frame: Bytes) -> BoxFuture<'a, Result<()>> {
        Box::pin(conn.write_frame(frame))
    }

    /// Hook for a connection accepted by a server.
    ///
    /// Returning `false` rejects the connection.
    fn on_connect(&self, conn: &Connection) -> bool {
        self.ensure_receiving(conn);
        true
    }

    /// Hook for a connection established by a client.
    ///
    /// Returning `false` rejects the connection.
    fn on_connect_as_client(&self, conn: &Connection) -> bool {
        self.ensure_receiving(conn);
        true
    }
}

/// Total length of a multi-segment message.
#[inline]
pub(crate) fn parts_len(parts: &[&[u8]]) -> usize {
    parts.iter().map(|p| p.len()).sum()
}
