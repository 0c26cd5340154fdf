//! Primitive payload conversions.
//!
//! Numbers are written little-endian with their natural width, booleans as a
//! single byte, and text as UTF-8. This matches the action-code prefix, so a
//! peer reading an `i32` payload reads it the same way it reads an action.

use bytes::Bytes;

use crate::error::{Result, SockwireError};

/// Conversion of a value into payload bytes.
pub trait IntoPayload {
    /// Produce the payload bytes for this value.
    fn into_payload(self) -> Bytes;
}

/// Conversion of payload bytes back into a value.
pub trait FromPayload: Sized {
    /// Parse a value from payload bytes.
    fn from_payload(data: &[u8]) -> Result<Self>;
}

macro_rules! impl_numeric_payload {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoPayload for $ty {
                #[inline]
                fn into_payload(self) -> Bytes {
                    Bytes::copy_from_slice(&self.to_le_bytes())
                }
            }

            impl FromPayload for $ty {
                fn from_payload(data: &[u8]) -> Result<Self> {
                    let bytes: [u8; std::mem::size_of::<$ty>()] =
                        data.try_into().map_err(|_| {
                            SockwireError::InvalidPayload(format!(
                                "expected {} bytes for {}, got {}",
                                std::mem::size_of::<$ty>(),
                                stringify!($ty),
                                data.len()
                            ))
                        })?;
                    Ok(<$ty>::from_le_bytes(bytes))
                }
            }
        )*
    };
}

impl_numeric_payload!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl IntoPayload for bool {
    #[inline]
    fn into_payload(self) -> Bytes {
        Bytes::copy_from_slice(&[self as u8])
    }
}

impl FromPayload for bool {
    fn from_payload(data: &[u8]) -> Result<Self> {
        match data {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(SockwireError::InvalidPayload(
                "expected a single 0/1 byte for bool".to_string(),
            )),
        }
    }
}

impl FromPayload for String {
    fn from_payload(data: &[u8]) -> Result<Self> {
        String::from_utf8(data.to_vec())
            .map_err(|e| SockwireError::InvalidPayload(format!("not UTF-8: {}", e)))
    }
}

impl IntoPayload for Bytes {
    #[inline]
    fn into_payload(self) -> Bytes {
        self
    }
}

impl IntoPayload for Vec<u8> {
    #[inline]
    fn into_payload(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoPayload for &[u8] {
    #[inline]
    fn into_payload(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> IntoPayload for &[u8; N] {
    #[inline]
    fn into_payload(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl IntoPayload for String {
    #[inline]
    fn into_payload(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoPayload for &str {
    #[inline]
    fn into_payload(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoPayload for () {
    #[inline]
    fn into_payload(self) -> Bytes {
        Bytes::new()
    }
}
