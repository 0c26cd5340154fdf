//! Action module - routing messages by a 4-byte action code.
//!
//! Provides:
//! - [`action_code`] - the stable string → code hash shared by both peers
//! - [`ActionRouter`] - maps action codes to handlers
//! - [`ActionContext`] - lets a handler reply on the originating connection
//!
//! # Wire format
//!
//! ```text
//! ┌──────────────┬──────────────────┐
//! │ Action code  │ Payload          │
//! │ i32 LE       │ remaining bytes  │
//! └──────────────┴──────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sockwire::action::{ActionRouter, ActionContext};
//!
//! let mut router = ActionRouter::new();
//! router.register("ping", |_msg, ctx: ActionContext| async move {
//!     ctx.reply("pong").await
//! });
//! ```

mod code;
mod context;
mod router;

pub use code::{action_code, split_action, IntoActionCode, ACTION_CODE_SIZE};
pub use context::ActionContext;
pub use router::{ActionHandler, ActionRouter, HandlerResult, TypedHandler, UnhandledAction};
