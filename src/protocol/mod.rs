//! Protocol module - wire format, packets and reassembly.
//!
//! This module implements the home bus framing layer:
//! - 4-byte header encoding/decoding
//! - Owned and borrowed packet types
//! - Byte-at-a-time reassembly state machine

mod packet;
mod reassembler;
mod wire_format;

pub use packet::{build_frame, encode_frame_into, Packet, PacketRef};
pub use reassembler::{Reassembler, RxState, Step};
pub use wire_format::{Header, HEADER_SIZE, MAX_DATA_LEN, MAX_FRAME_SIZE};
