//! Unframed stream protocol.
//!
//! Bytes are written as-is and every read from the stream becomes one
//! message. Boundaries therefore depend on how the network delivers data;
//! use it for peers that speak their own line or record format.

use bytes::{Bytes, BytesMut};

use super::{parts_len, Decoder, Protocol};
use crate::error::Result;

/// Default read size, and therefore maximum message size.
pub const DEFAULT_PLAIN_BUFFER_SIZE: usize = 8 * 1024;

/// Protocol without framing.
#[derive(Debug, Clone)]
pub struct PlainProtocol {
    buffer_size: usize,
}

impl PlainProtocol {
    /// Create a plain protocol with the default read size.
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_PLAIN_BUFFER_SIZE,
        }
    }

    /// Create a plain protocol reading at most `buffer_size` bytes per message.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }
}

impl Default for PlainProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for PlainProtocol {
    fn frame(&self, parts: &[&[u8]]) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(parts_len(parts));
        for part in parts {
            buf.extend_from_slice(part);
        }
        Ok(buf.freeze())
    }

    fn decoder(&self) -> Box<dyn Decoder> {
        Box::new(PlainDecoder)
    }

    fn read_buffer_size(&self) -> usize {
        self.buffer_size
    }
}

/// Decoder for [`PlainProtocol`]; holds no state.
pub struct PlainDecoder;

impl Decoder for PlainDecoder {
    fn decode(&mut self, data: &[u8], out: &mut Vec<Bytes>) -> Result<()> {
        if !data.is_empty() {
            out.push(Bytes::copy_from_slice(data));
        }
        Ok(())
    }

    fn buffered(&self) -> usize {
        0
    }
}
