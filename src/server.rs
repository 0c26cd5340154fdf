//! Server builder, accept loop, and connection registry.
//!
//! # Example
//!
//! ```ignore
//! use sockwire::ServerBuilder;
//!
//! let server = ServerBuilder::new()
//!     .action("ping", |_msg, ctx| async move { ctx.reply("pong").await })
//!     .on_connect(|conn| tracing::info!("client {} connected", conn.peer_addr()))
//!     .bind("127.0.0.1:7000")
//!     .await?;
//!
//! server.broadcast_action("motd", "hello everyone").await;
//! ```

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::net::{lookup_host, TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::action::IntoActionCode;
use crate::codec::IntoPayload;
use crate::connection::{Connection, ConnectionId};
use crate::endpoint::{endpoint_builder_methods, Endpoint};
use crate::error::{Result, SockwireError};
use crate::protocol::Role;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: u32 = 1024;

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Live connections of a server, keyed by id.
///
/// Inserted by the accept path, removed when a connection reaches
/// `Disconnected`.
#[derive(Default)]
pub(crate) struct Registry {
    connections: Mutex<HashMap<ConnectionId, Connection>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Connection>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, conn: Connection) {
        self.lock().insert(conn.id(), conn);
    }

    pub(crate) fn remove(&self, id: ConnectionId) -> Option<Connection> {
        self.lock().remove(&id)
    }

    fn snapshot(&self) -> Vec<Connection> {
        self.lock().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Builder for configuring and starting a [`Server`].
pub struct ServerBuilder {
    endpoint: Endpoint,
    backlog: u32,
}

impl ServerBuilder {
    /// Create a builder with the default protocol (2-byte length prefix).
    pub fn new() -> Self {
        Self {
            endpoint: Endpoint::default(),
            backlog: DEFAULT_BACKLOG,
        }
    }

    endpoint_builder_methods!();

    /// Set the listen backlog.
    ///
    /// Default: 1024
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Bind, listen, and start accepting connections.
    pub async fn bind(self, addr: impl ToSocketAddrs) -> Result<Server> {
        let mut last_error = None;

        for addr in lookup_host(addr).await? {
            match self.listen_on(addr) {
                Ok(listener) => {
                    let local_addr = listener.local_addr()?;
                    return Ok(Server::start(listener, local_addr, self.endpoint));
                }
                Err(e) => {
                    tracing::debug!("Could not listen on {}: {}", addr, e);
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

    fn listen_on(&self, addr: SocketAddr) -> Result<TcpListener> {
        let socket = self.endpoint.protocol.create_socket(&addr)?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        Ok(socket.listen(self.backlog)?)
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct ServerInner {
    endpoint: Arc<Endpoint>,
    registry: Arc<Registry>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

/// A listening server. Cheap to clone.
///
/// Keeps accepting until [`Server::shutdown`] is called, even if every
/// handle is dropped.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    fn start(listener: TcpListener, local_addr: SocketAddr, endpoint: Endpoint) -> Server {
        let (shutdown, _) = watch::channel(false);

        let server = Server {
            inner: Arc::new(ServerInner {
                endpoint: Arc::new(endpoint),
                registry: Arc::new(Registry::default()),
                local_addr,
                shutdown,
                accept_task: Mutex::new(None),
            }),
        };

        tracing::info!("Listening on {}", local_addr);
        let task = server
            .inner
            .endpoint
            .protocol
            .start_accepting(listener, server.clone());
        *server.lock_accept_task() = Some(task);

        server
    }

    fn lock_accept_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner.accept_task.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Snapshot of the live connections.
    pub fn connections(&self) -> Vec<Connection> {
        self.inner.registry.snapshot()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Check if [`Server::shutdown`] was called.
    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Send a payload to every live connection.
    ///
    /// Returns how many connections accepted the message.
    pub async fn broadcast(&self, payload: impl IntoPayload) -> usize {
        let payload = payload.into_payload();
        let mut delivered = 0;
        for conn in self.connections() {
            match conn.send(payload.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!("Broadcast to {} failed: {}", conn.id(), e),
            }
        }
        delivered
    }

    /// Send an action to every live connection.
    ///
    /// Returns how many connections accepted the message.
    pub async fn broadcast_action(
        &self,
        action: impl IntoActionCode,
        payload: impl IntoPayload,
    ) -> usize {
        let code = action.action_code();
        let payload = payload.into_payload();
        let mut delivered = 0;
        for conn in self.connections() {
            match conn.send_action(code, payload.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!("Broadcast to {} failed: {}", conn.id(), e),
            }
        }
        delivered
    }

    /// Stop accepting and close every connection.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }

        let accept_task = self.lock_accept_task().take();
        if let Some(task) = accept_task {
            task.abort();
            let _ = task.await;
        }

        for conn in self.connections() {
            conn.close().await;
        }
        tracing::info!("Server on {} shut down", self.inner.local_addr);
    }

    /// Resolves once [`Server::shutdown`] has been called.
    pub(crate) async fn stopped(&self) {
        let mut rx = self.inner.shutdown.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// Default accept loop used by [`Protocol::start_accepting`](crate::protocol::Protocol::start_accepting).
///
/// A failed accept is logged and retried; only an unusable listening socket
/// ends the loop.
pub(crate) fn spawn_accept_loop(listener: TcpListener, server: Server) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = server.stopped() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    let server = server.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.admit(stream, peer_addr).await {
                            tracing::warn!("Failed to admit {}: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) if is_fatal_accept_error(&e) => {
                    tracing::error!("Accept loop on {} stopped: {}", server.local_addr(), e);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Accept failed on {}: {}", server.local_addr(), e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    })
}

fn is_fatal_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::NotConnected | io::ErrorKind::Unsupported
    )
}

impl Server {
    /// Turn an accepted socket into a registered, connected [`Connection`].
    pub(crate) async fn admit(&self, stream: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        let endpoint = &self.inner.endpoint;

        stream.set_nodelay(true)?;
        if let Some(keep_alive) = &endpoint.keep_alive {
            keep_alive.apply(&stream)?;
        }
        let local_addr = stream.local_addr()?;
        let stream = endpoint.protocol.wrap_stream(stream, Role::Server).await?;

        let conn = Connection::new(
            stream,
            peer_addr,
            local_addr,
            Role::Server,
            endpoint.clone(),
            Some(Arc::downgrade(&self.inner.registry)),
        );

        if !endpoint.protocol.on_connect(&conn) {
            tracing::debug!("Connection {} from {} rejected", conn.id(), peer_addr);
            conn.close().await;
            return Ok(());
        }

        self.inner.registry.insert(conn.clone());
        if self.is_shut_down() || conn.open().is_err() {
            self.inner.registry.remove(conn.id());
            conn.close().await;
        }
        Ok(())
    }
}
