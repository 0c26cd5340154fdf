//! MsgPack codec using `rmp-serde`.
//!
//! Structs are written with `to_vec_named` so field names travel with the
//! data and peers can evolve their types independently.

use crate::error::Result;

/// MessagePack codec for structured payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Login {
        user: String,
        attempt: u32,
        remember: bool,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = Login {
            user: "alice".to_string(),
            attempt: 3,
            remember: true,
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: Login = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_struct_is_encoded_as_map() {
        let login = Login {
            user: "x".to_string(),
            attempt: 0,
            remember: false,
        };

        let encoded = MsgPackCodec::encode(&login).unwrap();

        // fixmap with 3 entries, not fixarray
        assert_eq!(encoded[0], 0x83);
    }

    #[test]
    fn test_option_none_is_nil() {
        let val: Option<i32> = None;
        let encoded = MsgPackCodec::encode(&val).unwrap();
        assert_eq!(encoded, vec![0xc0]);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Login> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(result.is_err());
    }
}
