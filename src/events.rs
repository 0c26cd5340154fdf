//! Lifecycle and data event subscriptions.
//!
//! Every registered callback receives every event once, in registration
//! order. Inbound messages reach [`Events::on_data`] handlers only after the
//! reply correlator and the action router have declined them.

use std::future::Future;
use std::sync::Arc;

use crate::connection::Connection;
use crate::error::SockwireError;
use crate::message::Message;
use crate::protocol::BoxFuture;

/// Callback for connect and disconnect events.
pub type ConnectionHandler = Arc<dyn Fn(&Connection) + Send + Sync>;

/// Async callback for received messages.
pub type DataHandler = Arc<dyn Fn(Connection, Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback for connection and handler errors.
pub type ErrorHandler = Arc<dyn Fn(&Connection, &SockwireError) + Send + Sync>;

/// Set of event subscriptions shared by every connection of an endpoint.
#[derive(Clone, Default)]
pub struct Events {
    connect: Vec<ConnectionHandler>,
    disconnect: Vec<ConnectionHandler>,
    data: Vec<DataHandler>,
    error: Vec<ErrorHandler>,
}

impl Events {
    /// Create an empty set of subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to connections becoming connected.
    pub fn on_connect<F>(&mut self, handler: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.connect.push(Arc::new(handler));
    }

    /// Subscribe to connections reaching the disconnected state.
    pub fn on_disconnect<F>(&mut self, handler: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.disconnect.push(Arc::new(handler));
    }

    /// Subscribe to received messages.
    ///
    /// Handlers for one connection run one message at a time, in wire order.
    pub fn on_data<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Connection, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: DataHandler =
            Arc::new(move |conn: Connection, message: Message| -> BoxFuture<'static, ()> {
                Box::pin(handler(conn, message))
            });
        self.data.push(handler);
    }

    /// Subscribe to errors.
    pub fn on_error<F>(&mut self, handler: F)
    where
        F: Fn(&Connection, &SockwireError) + Send + Sync + 'static,
    {
        self.error.push(Arc::new(handler));
    }

    /// Check if any data handler is registered.
    pub fn has_data_handlers(&self) -> bool {
        !self.data.is_empty()
    }

    pub(crate) fn fire_connect(&self, conn: &Connection) {
        for handler in &self.connect {
            handler(conn);
        }
    }

    pub(crate) fn fire_disconnect(&self, conn: &Connection) {
        for handler in &self.disconnect {
            handler(conn);
        }
    }

    pub(crate) async fn fire_data(&self, conn: &Connection, message: Message) {
        match self.data.as_slice() {
            [] => {
                tracing::trace!("No data handler for message on connection {}", conn.id());
            }
            [only] => only(conn.clone(), message).await,
            handlers => {
                for handler in handlers {
                    handler(conn.clone(), message.clone()).await;
                }
            }
        }
    }

    pub(crate) fn fire_error(&self, conn: &Connection, error: &SockwireError) {
        for handler in &self.error {
            handler(conn, error);
        }
    }
}
