//! Delimiter-terminated framing.
//!
//! Every message ends with a fixed byte sequence (`\r\n` by default). A
//! payload that contains the delimiter cannot be framed and is rejected by
//! [`DelimiterProtocol::frame`]. On the receiving side, buffering more than
//! the configured maximum without seeing a delimiter is a protocol error.

use bytes::{Bytes, BytesMut};

use super::{parts_len, Decoder, Protocol};
use crate::error::{Result, SockwireError};

/// Default delimiter.
pub const DEFAULT_DELIMITER: &[u8] = b"\r\n";

/// Default maximum message size (1 MiB).
pub const DEFAULT_MAX_DELIMITED_SIZE: usize = 1024 * 1024;

/// Protocol that terminates every message with a delimiter.
#[derive(Debug, Clone)]
pub struct DelimiterProtocol {
    delimiter: Bytes,
    auto_add_delimiter: bool,
    auto_remove_delimiter: bool,
    max_message_size: usize,
}

impl DelimiterProtocol {
    /// Create a protocol with a custom delimiter.
    ///
    /// # Errors
    ///
    /// Returns an error if the delimiter is empty.
    pub fn new(delimiter: impl Into<Bytes>) -> Result<Self> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return Err(SockwireError::Protocol(
                "Delimiter must not be empty".to_string(),
            ));
        }
        Ok(Self {
            delimiter,
            auto_add_delimiter: true,
            auto_remove_delimiter: true,
            max_message_size: DEFAULT_MAX_DELIMITED_SIZE,
        })
    }

    /// Whether `frame` appends the delimiter (default: true).
    ///
    /// When disabled the caller's last segment must already end with it.
    pub fn auto_add_delimiter(mut self, enabled: bool) -> Self {
        self.auto_add_delimiter = enabled;
        self
    }

    /// Whether decoded messages have the delimiter stripped (default: true).
    pub fn auto_remove_delimiter(mut self, enabled: bool) -> Self {
        self.auto_remove_delimiter = enabled;
        self
    }

    /// Set the maximum message size, delimiter excluded.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// The delimiter bytes.
    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }
}

impl Default for DelimiterProtocol {
    fn default() -> Self {
        Self {
            delimiter: Bytes::from_static(DEFAULT_DELIMITER),
            auto_add_delimiter: true,
            auto_remove_delimiter: true,
            max_message_size: DEFAULT_MAX_DELIMITED_SIZE,
        }
    }
}

impl Protocol for DelimiterProtocol {
    fn frame(&self, parts: &[&[u8]]) -> Result<Bytes> {
        let len = parts_len(parts);
        let mut buf = BytesMut::with_capacity(len + self.delimiter.len());
        for part in parts {
            buf.extend_from_slice(part);
        }

        if self.auto_add_delimiter {
            if find(&buf, &self.delimiter, 0).is_some() {
                return Err(SockwireError::Protocol(
                    "Payload contains the delimiter".to_string(),
                ));
            }
            buf.extend_from_slice(&self.delimiter);
        } else {
            let end = buf.len().saturating_sub(self.delimiter.len());
            if find(&buf, &self.delimiter, 0) != Some(end) || buf.len() < self.delimiter.len() {
                return Err(SockwireError::Protocol(
                    "Message must contain the delimiter exactly once, at the end".to_string(),
                ));
            }
        }

        let payload_len = buf.len() - self.delimiter.len();
        if payload_len > self.max_message_size {
            return Err(SockwireError::Protocol(format!(
                "Message size {} exceeds maximum {}",
                payload_len, self.max_message_size
            )));
        }

        Ok(buf.freeze())
    }

    fn decoder(&self) -> Box<dyn Decoder> {
        Box::new(DelimiterDecoder::build(
            self.delimiter.clone(),
            self.auto_remove_delimiter,
            self.max_message_size,
        ))
    }
}

/// Find `needle` in `haystack` starting at `from`.
fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// Decoder for [`DelimiterProtocol`].
pub struct DelimiterDecoder {
    buffer: BytesMut,
    delimiter: Bytes,
    remove_delimiter: bool,
    max_message_size: usize,
    /// Offset up to which the buffer is known not to contain a delimiter.
    scanned: usize,
}

impl DelimiterDecoder {
    /// Create a decoder for the given delimiter.
    ///
    /// # Errors
    ///
    /// Returns an error if the delimiter is empty.
    pub fn new(delimiter: Bytes, remove_delimiter: bool, max_message_size: usize) -> Result<Self> {
        if delimiter.is_empty() {
            return Err(SockwireError::Protocol(
                "Delimiter must not be empty".to_string(),
            ));
        }
        Ok(Self::build(delimiter, remove_delimiter, max_message_size))
    }

    /// `delimiter` must be non-empty.
    fn build(delimiter: Bytes, remove_delimiter: bool, max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            delimiter,
            remove_delimiter,
            max_message_size,
            scanned: 0,
        }
    }

    fn too_long(&self) -> SockwireError {
        SockwireError::Protocol(format!(
            "No delimiter within {} bytes",
            self.max_message_size
        ))
    }
}

impl Decoder for DelimiterDecoder {
    fn decode(&mut self, data: &[u8], out: &mut Vec<Bytes>) -> Result<()> {
        self.buffer.extend_from_slice(data);

        while let Some(pos) = find(&self.buffer, &self.delimiter, self.scanned) {
            self.scanned = 0;
            if pos > self.max_message_size {
                return Err(self.too_long());
            }

            let end = pos + self.delimiter.len();
            let mut message = self.buffer.split_to(end).freeze();
            if self.remove_delimiter {
                message.truncate(pos);
            }
            out.push(message);
        }

        // A delimiter may straddle the next chunk, so rescan its possible prefix.
        self.scanned = self
            .buffer
            .len()
            .saturating_sub(self.delimiter.len() - 1);

        // Without a delimiter in sight the pending message already exceeds
        // the limit, however the rest of it arrives.
        if self.buffer.len() >= self.max_message_size.saturating_add(self.delimiter.len()) {
            return Err(self.too_long());
        }

        Ok(())
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_appends_delimiter() {
        let protocol = DelimiterProtocol::default();
        let wire = protocol.frame(&[b"hello"]).unwrap();
        assert_eq!(&wire[..], b"hello\r\n");
    }

    #[test]
    fn test_roundtrip() {
        let protocol = DelimiterProtocol::new(&b"||"[..]).unwrap();
        for payload in [&b""[..], b"a", b"a|b|c"] {
            let wire = protocol.frame(&[payload]).unwrap();
            let messages = protocol.decoder().push(&wire).unwrap();
            assert_eq!(messages, vec![Bytes::copy_from_slice(payload)]);
        }
    }

    #[test]
    fn test_payload_containing_delimiter_is_rejected() {
        let protocol = DelimiterProtocol::default();
        let err = protocol.frame(&[b"line one\r\nline two"]).unwrap_err();
        assert!(err.to_string().contains("contains the delimiter"));
    }

    #[test]
    fn test_delimiter_split_across_segments_is_rejected() {
        let protocol = DelimiterProtocol::default();
        assert!(protocol.frame(&[b"abc\r", b"\ndef"]).is_err());
    }

    #[test]
    fn test_empty_delimiter_rejected() {
        assert!(DelimiterProtocol::new(Bytes::new()).is_err());
    }

    #[test]
    fn test_keep_delimiter_on_decode() {
        let protocol = DelimiterProtocol::default().auto_remove_delimiter(false);
        let messages = protocol.decoder().push(b"one\r\ntwo\r\n").unwrap();
        assert_eq!(messages[0], Bytes::from_static(b"one\r\n"));
        assert_eq!(messages[1], Bytes::from_static(b"two\r\n"));
    }

    #[test]
    fn test_manual_delimiter_must_be_at_end() {
        let protocol = DelimiterProtocol::default().auto_add_delimiter(false);
        assert_eq!(&protocol.frame(&[b"done\r\n"]).unwrap()[..], b"done\r\n");
        assert!(protocol.frame(&[b"no delimiter"]).is_err());
        assert!(protocol.frame(&[b"a\r\nb\r\n"]).is_err());
    }

    #[test]
    fn test_delimiter_straddling_chunks() {
        let protocol = DelimiterProtocol::default();
        let mut decoder = protocol.decoder();

        assert!(decoder.push(b"abc\r").unwrap().is_empty());
        let messages = decoder.push(b"\ndef\r\n").unwrap();
        assert_eq!(messages, vec![Bytes::from_static(b"abc"), Bytes::from_static(b"def")]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_byte_at_a_time_multibyte_delimiter() {
        let protocol = DelimiterProtocol::new(&b"<END>"[..]).unwrap();
        let wire = protocol.frame(&[b"payload"]).unwrap();
        let mut decoder = protocol.decoder();

        let mut all = Vec::new();
        for byte in wire.iter() {
            all.extend(decoder.push(&[*byte]).unwrap());
        }
        assert_eq!(all, vec![Bytes::from_static(b"payload")]);
    }

    #[test]
    fn test_missing_delimiter_overflow() {
        let protocol = DelimiterProtocol::default().max_message_size(8);
        let mut decoder = protocol.decoder();
        assert!(decoder.push(b"12345678").unwrap().is_empty());
        let err = decoder.push(b"9abc").unwrap_err();
        assert!(err.to_string().contains("No delimiter"));
    }

    #[test]
    fn test_oversized_message_rejected_regardless_of_chunking() {
        let protocol = DelimiterProtocol::default().max_message_size(8);

        let err = protocol.decoder().push(b"0123456789abcdef\r\n").unwrap_err();
        assert!(err.to_string().contains("No delimiter within 8"));

        let mut decoder = protocol.decoder();
        assert!(decoder.push(b"0123456789abcdef").is_err());
    }

    #[test]
    fn test_message_at_limit_is_accepted() {
        let protocol = DelimiterProtocol::default().max_message_size(8);
        let mut decoder = protocol.decoder();
        assert!(decoder.push(b"12345678\r").unwrap().is_empty());
        let messages = decoder.push(b"\n").unwrap();
        assert_eq!(messages, vec![Bytes::from_static(b"12345678")]);
    }

    #[test]
    fn test_messages_before_oversized_one_are_kept() {
        let protocol = DelimiterProtocol::default().max_message_size(4);
        let mut out = Vec::new();
        let result = protocol.decoder().decode(b"ok\r\ntoo long\r\n", &mut out);
        assert!(result.is_err());
        assert_eq!(out, vec![Bytes::from_static(b"ok")]);
    }

    #[test]
    fn test_decoder_rejects_empty_delimiter() {
        assert!(DelimiterDecoder::new(Bytes::new(), true, 8).is_err());
        assert!(DelimiterDecoder::new(Bytes::from_static(b"\n"), true, 8).is_ok());
    }

    #[test]
    fn test_frame_rejects_oversized_message() {
        let protocol = DelimiterProtocol::default().max_message_size(4);
        assert!(protocol.frame(&[b"12345"]).is_err());
        assert!(protocol.frame(&[b"1234"]).is_ok());
    }
}
