//! Context passed to action handlers.
//!
//! Replies go back on the connection the action arrived on, without an
//! action prefix, so a peer blocked in `send_action_and_get_reply` receives
//! them as its reply.
//!
//! # Example
//!
//! ```ignore
//! async fn ping(_msg: Message, ctx: ActionContext) -> HandlerResult {
//!     ctx.reply("pong").await
//! }
//! ```

use serde::Serialize;

use crate::action::IntoActionCode;
use crate::codec::IntoPayload;
use crate::connection::Connection;
use crate::error::Result;

/// Context for a single action invocation.
///
/// Cheap to clone; handlers may move it into spawned tasks.
#[derive(Clone)]
pub struct ActionContext {
    action: i32,
    connection: Connection,
}

impl ActionContext {
    pub(crate) fn new(action: i32, connection: Connection) -> Self {
        Self { action, connection }
    }

    /// The action code being handled.
    #[inline]
    pub fn action(&self) -> i32 {
        self.action
    }

    /// The connection the action arrived on.
    #[inline]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Send a reply payload.
    pub async fn reply(&self, payload: impl IntoPayload) -> Result<()> {
        self.connection.send(payload).await
    }

    /// Send a MsgPack-encoded reply.
    pub async fn reply_object<T: Serialize>(&self, value: &T) -> Result<()> {
        self.connection.send_object(value).await
    }

    /// Send a new action to the peer (not a reply).
    pub async fn send_action(
        &self,
        action: impl IntoActionCode,
        payload: impl IntoPayload,
    ) -> Result<()> {
        self.connection.send_action(action, payload).await
    }
}
