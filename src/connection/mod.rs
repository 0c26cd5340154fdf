//! Connection module - one socket, its state machine, and its reply slot.
//!
//! A [`Connection`] is a cheap handle; clones refer to the same socket.
//!
//! ```text
//!             ┌──────────────┐   frames   ┌─────────────┐
//! send_* ────►│ Protocol     │───────────►│ Writer Task │──► socket
//!             │ frame + send │            └─────────────┘
//!             └──────────────┘
//!
//! socket ──► Receive Task ──► decoder ──► reply slot ──► Dispatch Task
//!                                          (consumed)     router ─► on_data
//! ```
//!
//! The receive task only reads and decodes. Application callbacks run on a
//! separate dispatch task per connection, one message at a time, so a slow
//! handler never delays reply matching and messages keep their wire order.

mod pending;
mod receive;
mod state;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::io::ReadHalf;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::action::IntoActionCode;
use crate::codec::{IntoPayload, MsgPackCodec};
use crate::endpoint::Endpoint;
use crate::error::{Result, SockwireError};
use crate::message::Message;
use crate::protocol::{Protocol, Role};
use crate::server::Registry;
use crate::transport::BoxedStream;
use crate::writer::{spawn_writer_task, WriterHandle};

use pending::{PendingGuard, PendingSlot};
use state::StateCell;

pub(crate) use receive::spawn_receive_loop;
pub use state::ConnectionState;

/// How long a closing connection waits for queued frames to flush.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Inner {
    id: ConnectionId,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    role: Role,
    endpoint: Arc<Endpoint>,
    state: StateCell,
    writer: WriterHandle,
    writer_task: Mutex<Option<JoinHandle<Result<()>>>>,
    /// Read half until the receive loop claims it.
    reader: Mutex<Option<ReadHalf<BoxedStream>>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    /// Raised after the connect event fired; gates data dispatch.
    opened: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
    pending: PendingSlot,
    registry: Option<Weak<Registry>>,
}

/// Handle to one TCP connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Connection {
    /// Wrap a connected stream. Spawns the writer task; the receive loop is
    /// started later by the protocol's connect hook.
    pub(crate) fn new(
        stream: BoxedStream,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        role: Role,
        endpoint: Arc<Endpoint>,
        registry: Option<Weak<Registry>>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (writer, writer_task, write_failed) =
            spawn_writer_task(write_half, &endpoint.writer_config, shutdown_rx);
        let (opened, _) = watch::channel(false);

        let id = ConnectionId::next();
        tracing::debug!("Connection {} ({:?}) to {}", id, role, peer_addr);

        let conn = Self {
            inner: Arc::new(Inner {
                id,
                peer_addr,
                local_addr,
                role,
                endpoint,
                state: StateCell::new(),
                writer,
                writer_task: Mutex::new(Some(writer_task)),
                reader: Mutex::new(Some(read_half)),
                receive_task: Mutex::new(None),
                opened,
                shutdown,
                pending: PendingSlot::new(),
                registry,
            }),
        };

        let weak = Arc::downgrade(&conn.inner);
        tokio::spawn(async move {
            if write_failed.await.is_err() {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                Connection { inner }.writer_failed().await;
            }
        });

        conn
    }

    /// Unique id of this connection.
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Address of the remote peer.
    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Local address of the socket.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Whether this side connected or accepted.
    #[inline]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Check if the connection is in the `Connected` state.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Check if a request on this connection is waiting for its reply.
    pub fn is_awaiting_reply(&self) -> bool {
        self.inner.pending.is_waiting()
    }

    /// Get the current pending outbound frame count.
    pub fn pending_frames(&self) -> usize {
        self.inner.writer.pending_count()
    }

    /// Get the current backpressure status.
    pub fn is_backpressure_active(&self) -> bool {
        self.inner.writer.is_backpressure_active()
    }

    /// The framing protocol of this connection.
    pub fn protocol(&self) -> &dyn Protocol {
        self.inner.endpoint.protocol.as_ref()
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Start receiving if nothing reads from this connection yet.
    ///
    /// Idempotent: at most one receive loop ever runs per connection.
    pub fn ensure_receiving(&self) {
        self.protocol().ensure_receiving(self);
    }

    /// Move from `Connecting` to `Connected` and fire the connect event.
    pub(crate) fn open(&self) -> Result<()> {
        self.inner
            .state
            .transition(&[ConnectionState::Connecting], ConnectionState::Connected)
            .ok_or(SockwireError::ConnectionClosed)?;

        self.inner.endpoint.events.fire_connect(self);
        self.inner.opened.send_replace(true);
        Ok(())
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send a payload as one message.
    pub async fn send(&self, payload: impl IntoPayload) -> Result<()> {
        let payload = payload.into_payload();
        let frame = self.protocol().frame(&[&payload[..]])?;
        self.send_frame(frame).await
    }

    /// Send one message assembled from several segments.
    pub async fn send_parts(&self, parts: &[&[u8]]) -> Result<()> {
        let frame = self.protocol().frame(parts)?;
        self.send_frame(frame).await
    }

    /// Send a payload prefixed with an action code.
    pub async fn send_action(
        &self,
        action: impl IntoActionCode,
        payload: impl IntoPayload,
    ) -> Result<()> {
        let frame = self.action_frame(action.action_code(), payload.into_payload())?;
        self.send_frame(frame).await
    }

    /// Send a MsgPack-encoded object.
    pub async fn send_object<T: Serialize>(&self, value: &T) -> Result<()> {
        self.send(MsgPackCodec::encode(value)?).await
    }

    /// Send a MsgPack-encoded object prefixed with an action code.
    pub async fn send_action_object<T: Serialize>(
        &self,
        action: impl IntoActionCode,
        value: &T,
    ) -> Result<()> {
        self.send_action(action, MsgPackCodec::encode(value)?).await
    }

    /// Send an already-framed message through the protocol's send hook.
    pub async fn send_frame(&self, frame: Bytes) -> Result<()> {
        if !self.state().is_open() {
            return Err(SockwireError::ConnectionClosed);
        }
        let protocol = self.inner.endpoint.protocol.clone();
        protocol.send(self, frame).await
    }

    /// Queue framed bytes on the writer task, bypassing the protocol.
    ///
    /// Protocols overriding [`Protocol::send`] end up here.
    pub async fn write_frame(&self, frame: Bytes) -> Result<()> {
        self.inner.writer.send(frame).await
    }

    fn action_frame(&self, code: i32, payload: Bytes) -> Result<Bytes> {
        self.protocol().frame(&[&code.to_le_bytes()[..], &payload[..]])
    }

    // ========================================================================
    // Request / reply
    // ========================================================================

    /// Send a payload and wait for the next message from the peer.
    ///
    /// Returns `Ok(None)` if `timeout` elapses first (`None` waits forever),
    /// [`SockwireError::Busy`] if another request on this connection is
    /// still waiting, and [`SockwireError::ConnectionClosed`] if the
    /// connection goes away before a reply arrives.
    ///
    /// The reply bypasses action routing and data handlers.
    pub async fn send_and_get_reply(
        &self,
        payload: impl IntoPayload,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>> {
        let payload = payload.into_payload();
        let frame = self.protocol().frame(&[&payload[..]])?;
        self.request(frame, timeout).await
    }

    /// Send an action and wait for the next message from the peer.
    ///
    /// See [`Connection::send_and_get_reply`] for the outcomes.
    pub async fn send_action_and_get_reply(
        &self,
        action: impl IntoActionCode,
        payload: impl IntoPayload,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>> {
        let frame = self.action_frame(action.action_code(), payload.into_payload())?;
        self.request(frame, timeout).await
    }

    async fn request(&self, frame: Bytes, timeout: Option<Duration>) -> Result<Option<Message>> {
        let deadline = timeout.map(|t| Instant::now() + t);

        // The slot is armed before sending so an immediate reply cannot be missed.
        let (id, mut rx) = self.inner.pending.register()?;
        let guard = PendingGuard::new(&self.inner.pending, id);

        self.send_frame(frame).await?;

        let Some(deadline) = deadline else {
            return rx.await.map(Some).map_err(|_| SockwireError::ConnectionClosed);
        };

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(_)) => Err(SockwireError::ConnectionClosed),
            Err(_) if guard.cancel() => {
                tracing::debug!("Request on connection {} timed out", self.id());
                Ok(None)
            }
            // Resolved or closed between the timer firing and the cancel.
            Err(_) => rx.try_recv().map(Some).map_err(|_| SockwireError::ConnectionClosed),
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Close the connection.
    ///
    /// Frames queued before the call are flushed, a waiting request fails
    /// with [`SockwireError::ConnectionClosed`], and the receive loop stops.
    /// Returns once the connection is `Disconnected`; calling it again is a
    /// no-op.
    pub async fn close(&self) {
        self.disconnect(None, false).await;
    }

    /// Wait until the connection is `Disconnected`.
    pub async fn closed(&self) {
        self.inner
            .state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await;
    }

    /// A write failed: tear the connection down with the writer's error.
    async fn writer_failed(&self) {
        // Already claimed by a disconnect in progress.
        let Some(task) = lock(&self.inner.writer_task).take() else {
            return;
        };
        let error = match task.await {
            Ok(Err(e)) => e,
            Ok(Ok(())) => SockwireError::ConnectionClosed,
            Err(e) => SockwireError::Io(e.into()),
        };
        self.disconnect(Some(error), false).await;
    }

    pub(crate) async fn disconnect(&self, error: Option<SockwireError>, from_receiver: bool) {
        let previous = self.inner.state.transition(
            &[ConnectionState::Connecting, ConnectionState::Connected],
            ConnectionState::Disconnecting,
        );
        let Some(previous) = previous else {
            if !from_receiver {
                self.closed().await;
            }
            return;
        };
        let was_connected = previous == ConnectionState::Connected;
        let endpoint = &self.inner.endpoint;

        if let Some(e) = &error {
            tracing::warn!("Connection {} failed: {}", self.id(), e);
            endpoint.events.fire_error(self, e);
        }

        self.inner.shutdown.send_replace(true);
        self.inner.pending.close();
        lock(&self.inner.reader).take();

        if !from_receiver {
            let receive_task = lock(&self.inner.receive_task).take();
            if let Some(task) = receive_task {
                let _ = task.await;
            }
        }

        let writer_task = lock(&self.inner.writer_task).take();
        if let Some(mut task) = writer_task {
            match tokio::time::timeout(DEFAULT_CLOSE_TIMEOUT, &mut task).await {
                Ok(Ok(Err(e))) => tracing::debug!("Writer for connection {} ended: {}", self.id(), e),
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!("Writer for connection {} did not flush in time", self.id());
                    task.abort();
                }
            }
        }

        self.inner
            .state
            .transition(&[ConnectionState::Disconnecting], ConnectionState::Disconnected);

        if let Some(registry) = self.inner.registry.as_ref().and_then(Weak::upgrade) {
            registry.remove(self.id());
        }

        tracing::debug!("Connection {} disconnected", self.id());
        if was_connected {
            endpoint.events.fire_disconnect(self);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .finish()
    }
}
