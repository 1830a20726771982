//! Codec module - structured payload encoding.
//!
//! Frame payloads are raw bytes. Nodes that exchange structured values can
//! use [`MsgPackCodec`] to pack them into a payload that fits one frame.
//!
//! # Example
//!
//! ```
//! use homebus::codec::MsgPackCodec;
//! use homebus::protocol::MAX_DATA_LEN;
//!
//! let encoded = MsgPackCodec::encode_bounded(&(1u8, true), MAX_DATA_LEN).unwrap();
//! let decoded: (u8, bool) = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, (1, true));
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
