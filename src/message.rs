//! Decoded inbound message.
//!
//! A [`Message`] is one logical unit produced by a protocol decoder. When the
//! receiving side routes by action code, the 4-byte prefix is stripped from
//! the payload and kept in [`Message::action`].
//!
//! # Example
//!
//! ```
//! use sockwire::Message;
//! use bytes::Bytes;
//!
//! let msg = Message::new(Bytes::from_static(b"pong"));
//! assert_eq!(msg.as_str().unwrap(), "pong");
//! assert_eq!(msg.action(), None);
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::codec::{FromPayload, MsgPackCodec};
use crate::error::{Result, SockwireError};

/// A complete, immutable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: Bytes,
    action: Option<i32>,
}

impl Message {
    /// Create a message without an action code.
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            action: None,
        }
    }

    /// Create a message carrying an action code.
    pub fn with_action(action: i32, payload: Bytes) -> Self {
        Self {
            payload,
            action: Some(action),
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get a clone of the payload as Bytes (cheap, zero-copy).
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    /// Consume the message, returning its payload.
    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Action code, if this message was routed by action.
    #[inline]
    pub fn action(&self) -> Option<i32> {
        self.action
    }

    /// Get the payload length.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Interpret the payload as UTF-8 text.
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| SockwireError::InvalidPayload(format!("not UTF-8: {}", e)))
    }

    /// Decode the payload as a primitive value (little-endian for numbers).
    pub fn to<T: FromPayload>(&self) -> Result<T> {
        T::from_payload(&self.payload)
    }

    /// Decode the payload as a MsgPack-encoded object.
    pub fn to_object<T: DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::decode(&self.payload)
    }
}

impl From<Bytes> for Message {
    fn from(payload: Bytes) -> Self {
        Self::new(payload)
    }
}
