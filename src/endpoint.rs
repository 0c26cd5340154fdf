//! Configuration shared by every connection of a server or client.

use std::sync::Arc;

use crate::action::ActionRouter;
use crate::connection::Connection;
use crate::events::Events;
use crate::message::Message;
use crate::protocol::{LengthPrefixProtocol, Protocol};
use crate::transport::KeepAlive;
use crate::writer::WriterConfig;

/// Default capacity of the per-connection dispatch queue.
pub const DEFAULT_DISPATCH_CAPACITY: usize = 256;

/// Immutable settings shared read-only by all connections of an endpoint.
pub(crate) struct Endpoint {
    pub(crate) protocol: Arc<dyn Protocol>,
    pub(crate) events: Events,
    pub(crate) router: Option<ActionRouter>,
    pub(crate) writer_config: WriterConfig,
    pub(crate) dispatch_capacity: usize,
    pub(crate) keep_alive: Option<KeepAlive>,
}

impl Endpoint {
    /// Route a message the correlator did not consume.
    pub(crate) async fn dispatch(&self, conn: &Connection, message: Message) {
        let message = match &self.router {
            Some(router) => match router.dispatch(conn, message).await {
                Ok(Some(message)) => message,
                Ok(None) => return,
                Err(e) => {
                    tracing::error!("Action dispatch error on connection {}: {}", conn.id(), e);
                    self.events.fire_error(conn, &e);
                    return;
                }
            },
            None => message,
        };

        self.events.fire_data(conn, message).await;
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            protocol: Arc::new(LengthPrefixProtocol::new()),
            events: Events::new(),
            router: None,
            writer_config: WriterConfig::default(),
            dispatch_capacity: DEFAULT_DISPATCH_CAPACITY,
            keep_alive: None,
        }
    }
}

/// Fluent setters shared by [`ServerBuilder`](crate::ServerBuilder) and
/// [`ClientBuilder`](crate::ClientBuilder). Expects an `endpoint: Endpoint`
/// field on the builder.
macro_rules! endpoint_builder_methods {
    () => {
        /// Use a different framing protocol (default: 2-byte length prefix).
        pub fn protocol<P: $crate::protocol::Protocol>(mut self, protocol: P) -> Self {
            self.endpoint.protocol = ::std::sync::Arc::new(protocol);
            self
        }

        /// Use a protocol shared with other endpoints.
        pub fn shared_protocol(
            mut self,
            protocol: ::std::sync::Arc<dyn $crate::protocol::Protocol>,
        ) -> Self {
            self.endpoint.protocol = protocol;
            self
        }

        /// Subscribe to connections becoming connected.
        pub fn on_connect<F>(mut self, handler: F) -> Self
        where
            F: Fn(&$crate::Connection) + Send + Sync + 'static,
        {
            self.endpoint.events.on_connect(handler);
            self
        }

        /// Subscribe to connections being disconnected.
        pub fn on_disconnect<F>(mut self, handler: F) -> Self
        where
            F: Fn(&$crate::Connection) + Send + Sync + 'static,
        {
            self.endpoint.events.on_disconnect(handler);
            self
        }

        /// Subscribe to messages not consumed by a reply wait or an action.
        pub fn on_data<F, Fut>(mut self, handler: F) -> Self
        where
            F: Fn($crate::Connection, $crate::Message) -> Fut + Send + Sync + 'static,
            Fut: ::std::future::Future<Output = ()> + Send + 'static,
        {
            self.endpoint.events.on_data(handler);
            self
        }

        /// Subscribe to connection and handler errors.
        pub fn on_error<F>(mut self, handler: F) -> Self
        where
            F: Fn(&$crate::Connection, &$crate::SockwireError) + Send + Sync + 'static,
        {
            self.endpoint.events.on_error(handler);
            self
        }

        /// Register an action handler receiving the raw message.
        ///
        /// Registering any action switches inbound messages to action mode:
        /// each one must start with a 4-byte action code.
        pub fn action<F, Fut>(mut self, action: impl $crate::action::IntoActionCode, handler: F) -> Self
        where
            F: Fn($crate::Message, $crate::action::ActionContext) -> Fut + Send + Sync + 'static,
            Fut: ::std::future::Future<Output = $crate::action::HandlerResult> + Send + 'static,
        {
            self.endpoint
                .router
                .get_or_insert_with($crate::action::ActionRouter::new)
                .register(action, handler);
            self
        }

        /// Register an action handler receiving a MsgPack-decoded payload.
        pub fn action_typed<F, T, Fut>(
            mut self,
            action: impl $crate::action::IntoActionCode,
            handler: F,
        ) -> Self
        where
            F: Fn(T, $crate::action::ActionContext) -> Fut + Send + Sync + 'static,
            T: ::serde::de::DeserializeOwned + Send + 'static,
            Fut: ::std::future::Future<Output = $crate::action::HandlerResult> + Send + 'static,
        {
            self.endpoint
                .router
                .get_or_insert_with($crate::action::ActionRouter::new)
                .register_typed(action, handler);
            self
        }

        /// Use a prebuilt action router.
        pub fn router(mut self, router: $crate::action::ActionRouter) -> Self {
            self.endpoint.router = Some(router);
            self
        }

        /// Policy for action codes without a handler (default: drop).
        pub fn unhandled_actions(mut self, policy: $crate::action::UnhandledAction) -> Self {
            self.endpoint
                .router
                .get_or_insert_with($crate::action::ActionRouter::new)
                .set_unhandled(policy);
            self
        }

        /// Enable TCP keep-alive on every connection.
        pub fn keep_alive(mut self, keep_alive: $crate::transport::KeepAlive) -> Self {
            self.endpoint.keep_alive = Some(keep_alive);
            self
        }

        /// Set the maximum pending outbound frames for backpressure.
        ///
        /// Default: 1024
        pub fn max_pending_frames(mut self, limit: usize) -> Self {
            self.endpoint.writer_config.max_pending_frames = limit;
            self
        }

        /// Set the writer channel capacity.
        ///
        /// Default: 1024
        pub fn channel_capacity(mut self, capacity: usize) -> Self {
            self.endpoint.writer_config.channel_capacity = capacity;
            self
        }

        /// Set the backpressure timeout.
        ///
        /// Default: 5 seconds
        pub fn backpressure_timeout(mut self, timeout: ::std::time::Duration) -> Self {
            self.endpoint.writer_config.backpressure_timeout = timeout;
            self
        }

        /// Set how many decoded messages may wait for dispatch per connection.
        ///
        /// Default: 256
        pub fn dispatch_capacity(mut self, capacity: usize) -> Self {
            self.endpoint.dispatch_capacity = capacity.max(1);
            self
        }
    };
}

pub(crate) use endpoint_builder_methods;
