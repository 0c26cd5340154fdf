//! Client builder.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring handlers and
//! connecting. [`ClientBuilder::connect`] manages the lifecycle:
//! 1. Resolve the address and create a socket through the protocol
//! 2. Connect
//! 3. Tune the socket (no-delay, keep-alive) and wrap the stream
//! 4. Run the client-side connect hook
//! 5. Mark the connection connected and fire the connect event
//!
//! The connect timeout bounds steps 1 to 3, so a stalled handshake in
//! [`Protocol::wrap_stream`](crate::protocol::Protocol::wrap_stream) fails
//! the same way as an unanswered SYN.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use sockwire::ClientBuilder;
//!
//! let conn = ClientBuilder::new()
//!     .connect_timeout(Duration::from_secs(3))
//!     .connect("127.0.0.1:7000")
//!     .await?;
//!
//! let reply = conn
//!     .send_action_and_get_reply("ping", (), Some(Duration::from_secs(1)))
//!     .await?;
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream, ToSocketAddrs};

use crate::connection::Connection;
use crate::endpoint::{endpoint_builder_methods, Endpoint};
use crate::error::{Result, SockwireError};
use crate::protocol::Role;
use crate::transport::BoxedStream;

/// Builder for configuring and opening client connections.
///
/// Use [`ClientBuilder::build`] to open several connections with one
/// configuration.
pub struct ClientBuilder {
    endpoint: Endpoint,
    connect_timeout: Option<Duration>,
}

impl ClientBuilder {
    /// Create a builder with the default protocol (2-byte length prefix).
    pub fn new() -> Self {
        Self {
            endpoint: Endpoint::default(),
            connect_timeout: None,
        }
    }

    endpoint_builder_methods!();

    /// Give up connecting after `timeout`.
    ///
    /// Covers the TCP handshake and the protocol's stream wrapping.
    ///
    /// Default: no timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Connect to `addr`.
    pub async fn connect(self, addr: impl ToSocketAddrs) -> Result<Connection> {
        let timeout = self.connect_timeout;
        connect(Arc::new(self.endpoint), addr, timeout).await
    }

    /// Freeze the configuration for opening many connections.
    pub fn build(self) -> Client {
        Client {
            endpoint: Arc::new(self.endpoint),
            connect_timeout: self.connect_timeout,
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reusable client configuration. Cheap to clone.
///
/// Every connection opened by one `Client` shares its protocol, handlers,
/// and settings.
#[derive(Clone)]
pub struct Client {
    endpoint: Arc<Endpoint>,
    connect_timeout: Option<Duration>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Open a new connection to `addr`.
    pub async fn connect(&self, addr: impl ToSocketAddrs) -> Result<Connection> {
        connect(self.endpoint.clone(), addr, self.connect_timeout).await
    }
}

async fn connect(
    endpoint: Arc<Endpoint>,
    addr: impl ToSocketAddrs,
    timeout: Option<Duration>,
) -> Result<Connection> {
    let attempt = establish(&endpoint, addr);
    let (stream, peer_addr, local_addr) = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| SockwireError::ConnectTimeout)??,
        None => attempt.await?,
    };

    let conn = Connection::new(stream, peer_addr, local_addr, Role::Client, endpoint.clone(), None);

    if !endpoint.protocol.on_connect_as_client(&conn) {
        tracing::debug!("Connection {} to {} rejected", conn.id(), peer_addr);
        conn.close().await;
        return Err(SockwireError::Rejected);
    }

    conn.open()?;
    Ok(conn)
}

/// Connect, tune the socket, and let the protocol wrap the stream.
async fn establish(
    endpoint: &Endpoint,
    addr: impl ToSocketAddrs,
) -> Result<(BoxedStream, SocketAddr, SocketAddr)> {
    let (stream, peer_addr) = connect_any(endpoint, addr).await?;

    stream.set_nodelay(true)?;
    if let Some(keep_alive) = &endpoint.keep_alive {
        keep_alive.apply(&stream)?;
    }
    let local_addr = stream.local_addr()?;
    let stream = endpoint.protocol.wrap_stream(stream, Role::Client).await?;
    Ok((stream, peer_addr, local_addr))
}

/// Try every resolved address in turn.
async fn connect_any(
    endpoint: &Endpoint,
    addr: impl ToSocketAddrs,
) -> Result<(TcpStream, SocketAddr)> {
    let mut last_error = None;
    for addr in lookup_host(addr).await? {
        match connect_stream(endpoint, addr).await {
            Ok(stream) => return Ok((stream, addr)),
            Err(e) => {
                tracing::debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        SockwireError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "address resolved to nothing",
        ))
    }))
}

async fn connect_stream(endpoint: &Endpoint, addr: SocketAddr) -> Result<TcpStream> {
    let socket = endpoint.protocol.create_socket(&addr)?;
    Ok(socket.connect(addr).await?)
}
