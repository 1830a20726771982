//! MsgPack codec using `rmp-serde`.
//!
//! Structs are encoded as maps (`to_vec_named`) so that peers can decode
//! them by field name regardless of field order.

use crate::error::{HomebusError, Result};

/// MessagePack codec for structured payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Encode a value and check that it fits a payload of `max_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns `BadParam` if the encoded value is longer than `max_len`.
    pub fn encode_bounded<T: serde::Serialize>(value: &T, max_len: usize) -> Result<Vec<u8>> {
        let encoded = Self::encode(value)?;
        if encoded.len() > max_len {
            return Err(HomebusError::BadParam(format!(
                "Encoded payload of {} bytes exceeds maximum {}",
                encoded.len(),
                max_len
            )));
        }
        Ok(encoded)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
