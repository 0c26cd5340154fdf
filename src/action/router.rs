//! Action router for dispatching messages by action code.
//!
//! Handlers are registered under an integer code or a name (hashed with
//! [`action_code`](super::action_code)). Registering the same code twice
//! replaces the earlier handler.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use super::{split_action, ActionContext, IntoActionCode};
use crate::codec::MsgPackCodec;
use crate::connection::Connection;
use crate::error::{Result, SockwireError};
use crate::message::Message;
use crate::protocol::BoxFuture;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// What to do with a message whose action code has no handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnhandledAction {
    /// Log and discard the message.
    #[default]
    Drop,
    /// Forward the message to the generic data handlers.
    Notify,
    /// Report [`SockwireError::HandlerNotFound`] to the error handlers.
    Error,
}

/// Trait for action handlers.
pub trait ActionHandler: Send + Sync + 'static {
    /// Handle a message whose action prefix has been stripped.
    fn call(&self, message: Message, ctx: ActionContext) -> BoxFuture<'static, HandlerResult>;
}

/// Plain closures over the raw message.
impl<F, Fut> ActionHandler for F
where
    F: Fn(Message, ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, message: Message, ctx: ActionContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(message, ctx))
    }
}

/// Wrapper that MsgPack-decodes the payload before calling the handler.
pub struct TypedHandler<F, T, Fut>
where
    F: Fn(T, ActionContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> TypedHandler<F, T, Fut>
where
    F: Fn(T, ActionContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> ActionHandler for TypedHandler<F, T, Fut>
where
    F: Fn(T, ActionContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, message: Message, ctx: ActionContext) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match MsgPackCodec::decode(message.payload()) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        Box::pin((self.handler)(parsed, ctx))
    }
}

/// Registry mapping action codes to handlers.
pub struct ActionRouter {
    handlers: HashMap<i32, Box<dyn ActionHandler>>,
    unhandled: UnhandledAction,
}

impl ActionRouter {
    /// Create a new empty router.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            unhandled: UnhandledAction::default(),
        }
    }

    /// Register a handler receiving the raw message.
    pub fn register<F, Fut>(&mut self, action: impl IntoActionCode, handler: F)
    where
        F: Fn(Message, ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.insert(action.action_code(), Box::new(handler));
    }

    /// Register a handler receiving a MsgPack-decoded payload.
    pub fn register_typed<F, T, Fut>(&mut self, action: impl IntoActionCode, handler: F)
    where
        F: Fn(T, ActionContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.insert(action.action_code(), Box::new(TypedHandler::new(handler)));
    }

    fn insert(&mut self, code: i32, handler: Box<dyn ActionHandler>) {
        if self.handlers.insert(code, handler).is_some() {
            tracing::warn!("Replacing existing handler for action {}", code);
        }
    }

    /// Set the policy for unregistered action codes.
    pub fn set_unhandled(&mut self, policy: UnhandledAction) {
        self.unhandled = policy;
    }

    /// Policy for unregistered action codes.
    pub fn unhandled(&self) -> UnhandledAction {
        self.unhandled
    }

    /// Check whether a handler exists for an action.
    pub fn contains(&self, action: impl IntoActionCode) -> bool {
        self.handlers.contains_key(&action.action_code())
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no actions are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route one inbound message.
    ///
    /// Returns `Ok(None)` when the message was consumed, or `Ok(Some(msg))`
    /// (with its action code set) when it should reach the generic data
    /// handlers.
    pub(crate) async fn dispatch(
        &self,
        conn: &Connection,
        message: Message,
    ) -> Result<Option<Message>> {
        let (code, payload) = split_action(&message.into_payload())?;
        let message = Message::with_action(code, payload);

        let Some(handler) = self.handlers.get(&code) else {
            return match self.unhandled {
                UnhandledAction::Drop => {
                    tracing::debug!(
                        "Dropping message for unknown action {} on connection {}",
                        code,
                        conn.id()
                    );
                    Ok(None)
                }
                UnhandledAction::Notify => Ok(Some(message)),
                UnhandledAction::Error => Err(SockwireError::HandlerNotFound(code)),
            };
        };

        let ctx = ActionContext::new(code, conn.clone());
        handler.call(message, ctx).await?;
        Ok(None)
    }
}

impl Default for ActionRouter {
    fn default() -> Self {
        Self::new()
    }
}
