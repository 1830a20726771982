//! Packet types and frame serialization.
//!
//! [`Packet`] owns its payload (via `bytes::Bytes`) and is what callers
//! build for transmission or keep after reception. [`PacketRef`] is the
//! borrowed view the reassembler hands to receive handlers; its payload
//! points into the reassembly buffer and is only valid for the duration
//! of the callback.
//!
//! # Example
//!
//! ```
//! use homebus::protocol::{build_frame, Packet};
//!
//! let packet = Packet::from_slice(0x01, 0x02, 0x10, &[0xAA, 0xBB, 0xCC]);
//! let bytes = build_frame(&packet).unwrap();
//! assert_eq!(bytes, [0x01, 0x02, 0x10, 0x03, 0xAA, 0xBB, 0xCC]);
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::wire_format::{Header, HEADER_SIZE, MAX_DATA_LEN};
use crate::codec::MsgPackCodec;
use crate::error::{HomebusError, Result};

/// A complete frame, owned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Packet {
    /// Bus address of the originating node.
    pub source: u8,
    /// Bus address of the target node.
    pub destination: u8,
    /// Application-defined operation selector.
    pub op_code: u8,
    /// Payload bytes.
    pub data: Bytes,
}

impl Packet {
    /// Create a new packet from an existing payload.
    pub fn new(source: u8, destination: u8, op_code: u8, data: Bytes) -> Self {
        Self {
            source,
            destination,
            op_code,
            data,
        }
    }

    /// Create a packet, copying the payload.
    pub fn from_slice(source: u8, destination: u8, op_code: u8, data: &[u8]) -> Self {
        Self::new(source, destination, op_code, Bytes::copy_from_slice(data))
    }

    /// Create a packet with an empty payload.
    pub fn empty(source: u8, destination: u8, op_code: u8) -> Self {
        Self::new(source, destination, op_code, Bytes::new())
    }

    /// Create a packet with a MsgPack-encoded payload.
    ///
    /// Fails with `BadParam` if the encoded value does not fit a frame.
    pub fn msgpack<T: Serialize>(
        source: u8,
        destination: u8,
        op_code: u8,
        value: &T,
    ) -> Result<Self> {
        let data = MsgPackCodec::encode_bounded(value, MAX_DATA_LEN)?;
        Ok(Self::new(source, destination, op_code, Bytes::from(data)))
    }

    /// Payload length in bytes.
    #[inline]
    pub fn length(&self) -> usize {
        self.data.len()
    }

    /// Payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Total frame size on the wire.
    #[inline]
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }

    /// Build the header, checking the payload against `max_data_len`.
    pub fn header(&self, max_data_len: usize) -> Result<Header> {
        let bound = max_data_len.min(MAX_DATA_LEN);
        if self.data.len() > bound {
            return Err(HomebusError::BadParam(format!(
                "Payload length {} exceeds maximum {}",
                self.data.len(),
                bound
            )));
        }
        Ok(Header::new(
            self.source,
            self.destination,
            self.op_code,
            self.data.len() as u8,
        ))
    }

    /// Encode as a complete frame.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        build_frame(self)
    }

    /// Decode the payload as MsgPack.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::decode(&self.data)
    }
}

/// Borrowed view of a reassembled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketRef<'a> {
    header: Header,
    data: &'a [u8],
}

impl<'a> PacketRef<'a> {
    /// Create a view from a header and its payload.
    ///
    /// `data.len()` must equal `header.length`.
    pub fn new(header: Header, data: &'a [u8]) -> Self {
        debug_assert_eq!(header.length as usize, data.len());
        Self { header, data }
    }

    /// Decoded header.
    #[inline]
    pub fn header(&self) -> Header {
        self.header
    }

    #[inline]
    pub fn source(&self) -> u8 {
        self.header.source
    }

    #[inline]
    pub fn destination(&self) -> u8 {
        self.header.destination
    }

    #[inline]
    pub fn op_code(&self) -> u8 {
        self.header.op_code
    }

    /// Payload length in bytes.
    #[inline]
    pub fn length(&self) -> usize {
        self.data.len()
    }

    /// Payload bytes (borrowed from the reassembly buffer).
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        self.data
    }

    /// Copy into an owned [`Packet`] that outlives the callback.
    pub fn to_owned_packet(&self) -> Packet {
        Packet::from_slice(
            self.header.source,
            self.header.destination,
            self.header.op_code,
            self.data,
        )
    }

    /// Decode the payload as MsgPack.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::decode(self.data)
    }
}

impl PartialEq<Packet> for PacketRef<'_> {
    fn eq(&self, other: &Packet) -> bool {
        self.header.source == other.source
            && self.header.destination == other.destination
            && self.header.op_code == other.op_code
            && self.data == &other.data[..]
    }
}

impl PartialEq<PacketRef<'_>> for Packet {
    fn eq(&self, other: &PacketRef<'_>) -> bool {
        other == self
    }
}

/// Encode a packet into `buf` using the payload bound `max_data_len`.
///
/// Returns the number of bytes written. Fails with `BadParam` if the
/// payload is too long or `buf` cannot hold the frame.
pub fn encode_frame_into(packet: &Packet, max_data_len: usize, buf: &mut [u8]) -> Result<usize> {
    let header = packet.header(max_data_len)?;
    let size = header.frame_size();
    if buf.len() < size {
        return Err(HomebusError::BadParam(format!(
            "Frame of {} bytes does not fit buffer of {}",
            size,
            buf.len()
        )));
    }
    header.encode_into(buf);
    buf[HEADER_SIZE..size].copy_from_slice(&packet.data);
    Ok(size)
}

/// Build a complete frame as a single byte vector.
pub fn build_frame(packet: &Packet) -> Result<Vec<u8>> {
    let header = packet.header(MAX_DATA_LEN)?;
    let mut buf = Vec::with_capacity(header.frame_size());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(&packet.data);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAX_FRAME_SIZE;

    #[test]
    fn test_build_frame_layout() {
        let packet = Packet::from_slice(0x01, 0x02, 0x10, &[0xAA, 0xBB, 0xCC]);
        let bytes = build_frame(&packet).unwrap();
        assert_eq!(bytes, vec![0x01, 0x02, 0x10, 0x03, 0xAA, 0xBB, 0xCC]);
        assert_eq!(bytes.len(), packet.wire_size());
    }

    #[test]
    fn test_build_frame_empty_payload() {
        let bytes = build_frame(&Packet::empty(0x10, 0x00, 42)).unwrap();
        assert_eq!(bytes, vec![0x10, 0x00, 42, 0]);
    }

    #[test]
    fn test_build_frame_rejects_oversized_payload() {
        let packet = Packet::from_slice(1, 2, 3, &[0u8; MAX_DATA_LEN + 1]);
        assert!(build_frame(&packet).unwrap_err().is_bad_param());
    }

    #[test]
    fn test_encode_frame_into_respects_bound() {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let packet = Packet::from_slice(1, 2, 3, &[9u8; 9]);

        assert!(encode_frame_into(&packet, 8, &mut buf)
            .unwrap_err()
            .is_bad_param());

        let n = encode_frame_into(&packet, 16, &mut buf).unwrap();
        assert_eq!(n, HEADER_SIZE + 9);
        assert_eq!(&buf[..HEADER_SIZE], &[1, 2, 3, 9]);
    }

    #[test]
    fn test_encode_frame_into_small_buffer() {
        let mut buf = [0u8; 5];
        let packet = Packet::from_slice(1, 2, 3, b"abc");
        assert!(encode_frame_into(&packet, MAX_DATA_LEN, &mut buf).is_err());
    }

    #[test]
    fn test_packet_ref_to_owned() {
        let data = [1u8, 2, 3];
        let view = PacketRef::new(Header::new(5, 6, 7, 3), &data);
        let owned = view.to_owned_packet();

        assert_eq!(owned.source, 5);
        assert_eq!(owned.destination, 6);
        assert_eq!(owned.op_code, 7);
        assert_eq!(owned.payload(), &data);
        assert_eq!(view, owned);
    }

    #[test]
    fn test_msgpack_payload() {
        let packet = Packet::msgpack(1, 2, 3, &(7u8, "on")).unwrap();
        let decoded: (u8, String) = packet.decode().unwrap();
        assert_eq!(decoded, (7, "on".to_string()));
    }

    #[test]
    fn test_msgpack_payload_too_large() {
        let big = "x".repeat(MAX_DATA_LEN * 2);
        assert!(Packet::msgpack(1, 2, 3, &big).unwrap_err().is_bad_param());
    }
}
