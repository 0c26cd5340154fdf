//! Length-prefixed framing.
//!
//! ```text
//! ┌────────────────┬──────────────────┐
//! │ Length         │ Payload          │
//! │ 2 or 4 bytes LE│ Length bytes     │
//! └────────────────┴──────────────────┘
//! ```
//!
//! The default 2-byte prefix limits messages to 65535 bytes. Enabling large
//! messages switches to a 4-byte prefix bounded by a configurable maximum.
//! A prefix above the maximum cannot be resynchronised, so the decoder
//! reports a protocol error and the connection is closed.

use bytes::{BufMut, Bytes, BytesMut};

use super::{parts_len, Decoder, Protocol};
use crate::error::{Result, SockwireError};

/// Default maximum message size with a 4-byte prefix (1 GiB).
pub const DEFAULT_MAX_LARGE_MESSAGE_SIZE: u32 = 1_073_741_824;

/// Width of the length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixWidth {
    /// 2-byte little-endian prefix.
    U16,
    /// 4-byte little-endian prefix.
    U32,
}

impl PrefixWidth {
    /// Prefix size in bytes.
    #[inline]
    pub fn size(self) -> usize {
        match self {
            PrefixWidth::U16 => 2,
            PrefixWidth::U32 => 4,
        }
    }

    #[inline]
    fn read(self, buf: &[u8]) -> u32 {
        match self {
            PrefixWidth::U16 => u16::from_le_bytes([buf[0], buf[1]]) as u32,
            PrefixWidth::U32 => u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
        }
    }
}

/// Protocol that prefixes every message with its length.
#[derive(Debug, Clone)]
pub struct LengthPrefixProtocol {
    width: PrefixWidth,
    max_message_size: u32,
}

impl LengthPrefixProtocol {
    /// 2-byte prefix, messages up to 65535 bytes.
    pub fn new() -> Self {
        Self {
            width: PrefixWidth::U16,
            max_message_size: u16::MAX as u32,
        }
    }

    /// 4-byte prefix with the default 1 GiB limit.
    pub fn large() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_LARGE_MESSAGE_SIZE)
    }

    /// 4-byte prefix with a custom limit.
    pub fn with_max_message_size(max_message_size: u32) -> Self {
        Self {
            width: PrefixWidth::U32,
            max_message_size,
        }
    }

    /// Prefix width in use.
    pub fn width(&self) -> PrefixWidth {
        self.width
    }

    /// Largest payload this protocol frames or accepts.
    pub fn max_message_size(&self) -> u32 {
        self.max_message_size
    }
}

impl Default for LengthPrefixProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for LengthPrefixProtocol {
    fn frame(&self, parts: &[&[u8]]) -> Result<Bytes> {
        let len = parts_len(parts);
        if len > self.max_message_size as usize {
            return Err(SockwireError::Protocol(format!(
                "Message size {} exceeds maximum {}",
                len, self.max_message_size
            )));
        }

        let mut buf = BytesMut::with_capacity(self.width.size() + len);
        match self.width {
            PrefixWidth::U16 => buf.put_u16_le(len as u16),
            PrefixWidth::U32 => buf.put_u32_le(len as u32),
        }
        for part in parts {
            buf.extend_from_slice(part);
        }
        Ok(buf.freeze())
    }

    fn decoder(&self) -> Box<dyn Decoder> {
        Box::new(LengthPrefixDecoder::new(self.width, self.max_message_size))
    }
}

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for a complete length prefix.
    WaitingForPrefix,
    /// Prefix parsed, waiting for `remaining` payload bytes.
    WaitingForPayload { remaining: usize },
}

/// Decoder for [`LengthPrefixProtocol`].
pub struct LengthPrefixDecoder {
    buffer: BytesMut,
    state: State,
    width: PrefixWidth,
    max_message_size: u32,
}

impl LengthPrefixDecoder {
    /// Create a decoder for the given prefix width and limit.
    pub fn new(width: PrefixWidth, max_message_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::WaitingForPrefix,
            width,
            max_message_size,
        }
    }

    /// Try to extract a single message from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForPrefix => {
                    let prefix = self.width.size();
                    if self.buffer.len() < prefix {
                        return Ok(None);
                    }

                    let len = self.width.read(&self.buffer[..prefix]);
                    if len > self.max_message_size {
                        return Err(SockwireError::Protocol(format!(
                            "Message size {} exceeds maximum {}",
                            len, self.max_message_size
                        )));
                    }

                    let _ = self.buffer.split_to(prefix);
                    self.state = State::WaitingForPayload {
                        remaining: len as usize,
                    };
                }
                State::WaitingForPayload { remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForPrefix;
                    return Ok(Some(payload));
                }
            }
        }
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForPrefix => "WaitingForPrefix",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Decoder for LengthPrefixDecoder {
    fn decode(&mut self, data: &[u8], out: &mut Vec<Bytes>) -> Result<()> {
        self.buffer.extend_from_slice(data);

        while let Some(message) = self.try_extract_one()? {
            out.push(message);
        }
        Ok(())
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
