//! Codec module - turning values into payload bytes and back.
//!
//! - [`IntoPayload`] / [`FromPayload`] - primitives, booleans, text and raw
//!   byte buffers (numbers are little-endian)
//! - [`MsgPackCodec`] - arbitrary serde objects via `rmp-serde`
//!
//! # Example
//!
//! ```
//! use sockwire::codec::{FromPayload, IntoPayload, MsgPackCodec};
//!
//! let bytes = 1234u32.into_payload();
//! assert_eq!(u32::from_payload(&bytes).unwrap(), 1234);
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;
mod payload;

pub use msgpack::MsgPackCodec;
pub use payload::{FromPayload, IntoPayload};
