//! Action code encoding.
//!
//! String actions are hashed with djb2 over their UTF-8 bytes using 32-bit
//! wrapping arithmetic, so the same name yields the same code in every
//! process and on every platform:
//!
//! ```text
//! h = 5381
//! for b in name.bytes(): h = h * 33 + b   (mod 2^32, as i32)
//! ```

use bytes::Bytes;

use crate::error::{Result, SockwireError};

/// Size of the action code prefix in bytes.
pub const ACTION_CODE_SIZE: usize = 4;

/// Hash an action name to its action code.
///
/// # Example
///
/// ```
/// use sockwire::action::action_code;
///
/// assert_eq!(action_code(""), 5381);
/// assert_eq!(action_code("a"), 177670);
/// ```
pub const fn action_code(name: &str) -> i32 {
    let bytes = name.as_bytes();
    let mut hash: i32 = 5381;
    let mut i = 0;
    while i < bytes.len() {
        hash = hash.wrapping_mul(33).wrapping_add(bytes[i] as i32);
        i += 1;
    }
    hash
}

/// Anything that identifies an action: a code or a name.
pub trait IntoActionCode {
    /// The integer code placed on the wire.
    fn action_code(&self) -> i32;
}

impl IntoActionCode for i32 {
    #[inline]
    fn action_code(&self) -> i32 {
        *self
    }
}

impl IntoActionCode for &str {
    #[inline]
    fn action_code(&self) -> i32 {
        action_code(self)
    }
}

impl IntoActionCode for String {
    #[inline]
    fn action_code(&self) -> i32 {
        action_code(self)
    }
}

impl IntoActionCode for &String {
    #[inline]
    fn action_code(&self) -> i32 {
        action_code(self)
    }
}

/// Split a message payload into its action code and the remaining bytes.
pub fn split_action(payload: &Bytes) -> Result<(i32, Bytes)> {
    if payload.len() < ACTION_CODE_SIZE {
        return Err(SockwireError::Protocol(format!(
            "Message of {} bytes is too short for an action code",
            payload.len()
        )));
    }
    let code = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Ok((code, payload.slice(ACTION_CODE_SIZE..)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_hash_values() {
        assert_eq!(action_code(""), 5381);
        assert_eq!(action_code("a"), 5381 * 33 + 97);
        assert_eq!(action_code("ab"), (5381 * 33 + 97) * 33 + 98);
    }

    #[test]
    fn test_hash_wraps_instead_of_overflowing() {
        let long = "a very long action name that certainly overflows thirty two bits";
        let expected = long
            .bytes()
            .fold(5381u32, |h, b| h.wrapping_mul(33).wrapping_add(b as u32)) as i32;
        assert_eq!(action_code(long), expected);
    }

    #[test]
    fn test_hash_is_const() {
        const ECHO: i32 = action_code("echo");
        assert_eq!("echo".action_code(), ECHO);
        assert_eq!(String::from("echo").action_code(), ECHO);
    }

    #[test]
    fn test_distinct_names() {
        assert_ne!(action_code("login"), action_code("logout"));
    }

    #[test]
    fn test_split_action() {
        let mut raw = 7i32.to_le_bytes().to_vec();
        raw.extend_from_slice(b"ping");
        let (code, rest) = split_action(&Bytes::from(raw)).unwrap();
        assert_eq!(code, 7);
        assert_eq!(&rest[..], b"ping");
    }

    #[test]
    fn test_split_negative_code() {
        let raw = Bytes::copy_from_slice(&(-2i32).to_le_bytes());
        let (code, rest) = split_action(&raw).unwrap();
        assert_eq!(code, -2);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_split_too_short() {
        let err = split_action(&Bytes::from_static(b"abc")).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }
}
