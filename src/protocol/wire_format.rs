//! Wire format encoding and decoding.
//!
//! Implements the 4-byte frame header:
//! ```text
//! ┌──────────┬──────────┬─────────┬────────┬──────────────────┐
//! │ Source   │ Dest     │ Op code │ Length │ Payload          │
//! │ 1 byte   │ 1 byte   │ 1 byte  │ 1 byte │ 0..=MAX_DATA_LEN │
//! └──────────┴──────────┴─────────┴────────┴──────────────────┘
//! ```
//!
//! There is no start-of-frame delimiter, escaping or checksum. The length
//! byte is trusted as received, so a corrupted length desynchronizes the
//! receiver until the byte count happens to line up with a frame boundary.

use crate::error::{HomebusError, Result};

/// Header size in bytes (fixed, exactly 4).
pub const HEADER_SIZE: usize = 4;

/// Maximum payload length; capacity of the reassembly buffer.
pub const MAX_DATA_LEN: usize = 64;

/// Largest possible frame on the wire.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_DATA_LEN;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Header {
    /// Bus address of the originating node.
    pub source: u8,
    /// Bus address of the target node.
    pub destination: u8,
    /// Application-defined operation selector.
    pub op_code: u8,
    /// Number of payload bytes following the header.
    pub length: u8,
}

impl Header {
    /// Create a new header.
    pub fn new(source: u8, destination: u8, op_code: u8, length: u8) -> Self {
        Self {
            source,
            destination,
            op_code,
            length,
        }
    }

    /// Encode header to bytes in wire order.
    ///
    /// # Example
    ///
    /// ```
    /// use homebus::protocol::Header;
    ///
    /// let header = Header::new(0x10, 0x00, 42, 0);
    /// assert_eq!(header.encode(), [0x10, 0x00, 42, 0]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        [self.source, self.destination, self.op_code, self.length]
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (4 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[..HEADER_SIZE].copy_from_slice(&self.encode());
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        match buf {
            [source, destination, op_code, length, ..] => Some(Self {
                source: *source,
                destination: *destination,
                op_code: *op_code,
                length: *length,
            }),
            _ => None,
        }
    }

    /// Validate the declared length against a payload bound.
    pub fn validate(&self, max_data_len: usize) -> Result<()> {
        if self.length as usize > max_data_len {
            return Err(HomebusError::BadParam(format!(
                "Payload length {} exceeds maximum {}",
                self.length, max_data_len
            )));
        }
        Ok(())
    }

    /// Total frame size on the wire (header + payload).
    #[inline]
    pub fn frame_size(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }
}
