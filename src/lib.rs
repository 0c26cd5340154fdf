//! # sockwire
//!
//! Framed messaging over TCP.
//!
//! Two endpoints exchange discrete messages over a byte stream. A pluggable
//! [`Protocol`](protocol::Protocol) decides how messages are framed; the
//! core adds optional action-code routing and request/reply with timeouts.
//!
//! ## Architecture
//!
//! - **Protocol**: immutable framing descriptor shared by all connections;
//!   each connection builds its own [`Decoder`](protocol::Decoder)
//! - **Connection**: one socket, a writer task serializing sends, a receive
//!   task decoding frames, and a single reply slot
//! - **Server**: accept loop plus a registry of live connections
//! - **Action router**: dispatches messages by their 4-byte action code
//!
//! Inbound messages go to a waiting request first, then to the action
//! router, then to the generic data handlers.
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use sockwire::{ClientBuilder, ServerBuilder};
//!
//! #[tokio::main]
//! async fn main() -> sockwire::Result<()> {
//!     let server = ServerBuilder::new()
//!         .action(7, |msg, ctx| async move {
//!             assert_eq!(msg.as_str()?, "ping");
//!             ctx.reply("pong").await
//!         })
//!         .bind("127.0.0.1:0")
//!         .await?;
//!
//!     let conn = ClientBuilder::new().connect(server.local_addr()).await?;
//!     let reply = conn
//!         .send_action_and_get_reply(7, "ping", Some(Duration::from_secs(1)))
//!         .await?;
//!     assert_eq!(reply.unwrap().as_str()?, "pong");
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod codec;
pub mod connection;
pub mod error;
pub mod events;
pub mod message;
pub mod protocol;
pub mod transport;
pub mod writer;

mod client;
mod endpoint;
mod server;

pub use action::{ActionContext, HandlerResult, UnhandledAction};
pub use client::{Client, ClientBuilder};
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use endpoint::DEFAULT_DISPATCH_CAPACITY;
pub use error::{Result, SockwireError};
pub use message::Message;
pub use server::{Server, ServerBuilder, DEFAULT_BACKLOG};
