//! Byte-at-a-time frame reassembly.
//!
//! The reassembler is a linear five-state machine keyed on byte count:
//! - `WaitForSelfAddr` → `WaitForDestAddr` → `WaitForOpCode` → `WaitForLen`
//! - `WaitForLen` → `WaitForData` (or straight back to `WaitForSelfAddr`
//!   for an empty payload)
//! - `WaitForData` until `length` payload bytes have arrived
//!
//! Every call to [`Reassembler::step`] consumes exactly one byte, so it
//! makes no assumption about how bytes are grouped by the transport.
//! The machine never blocks and never wedges: an out-of-bound length byte
//! resets it to the initial state.
//!
//! # Example
//!
//! ```
//! use homebus::protocol::{Reassembler, Step};
//!
//! let mut rx = Reassembler::with_max_data_len(8);
//! let mut frames = Vec::new();
//!
//! for byte in [0x01, 0x02, 0x10, 0x03, 0xAA, 0xBB, 0xCC] {
//!     if let Step::Complete(packet) = rx.step(byte).unwrap() {
//!         frames.push(packet.to_owned_packet());
//!     }
//! }
//!
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].payload(), &[0xAA, 0xBB, 0xCC]);
//! ```

use super::packet::PacketRef;
use super::wire_format::{Header, MAX_DATA_LEN};
use crate::error::{HomebusError, Result};

/// Reassembly state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RxState {
    /// Next byte is the source address. Initial state.
    #[default]
    WaitForSelfAddr,
    /// Next byte is the destination address.
    WaitForDestAddr,
    /// Next byte is the operation code.
    WaitForOpCode,
    /// Next byte is the payload length.
    WaitForLen,
    /// Collecting payload bytes.
    WaitForData,
}

impl RxState {
    /// State name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            RxState::WaitForSelfAddr => "WaitForSelfAddr",
            RxState::WaitForDestAddr => "WaitForDestAddr",
            RxState::WaitForOpCode => "WaitForOpCode",
            RxState::WaitForLen => "WaitForLen",
            RxState::WaitForData => "WaitForData",
        }
    }
}

/// Outcome of a single reassembly step.
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub enum Step<'a> {
    /// Byte accepted, frame not complete yet.
    Pending,
    /// Byte completed a frame. The payload borrows the internal buffer,
    /// which is reused by the next step.
    Complete(PacketRef<'a>),
}

impl Step<'_> {
    /// True if this step completed a frame.
    pub fn is_complete(&self) -> bool {
        matches!(self, Step::Complete(_))
    }
}

/// Incremental frame reassembler with a fixed-size payload buffer.
#[derive(Debug, Clone)]
pub struct Reassembler {
    /// Current parsing state.
    state: RxState,
    /// Header fields accepted so far.
    header: Header,
    /// Payload storage, reused across frames.
    buf: [u8; MAX_DATA_LEN],
    /// Payload bytes accepted for the current frame.
    cursor: usize,
    /// Enforced payload bound, never above `MAX_DATA_LEN`.
    max_data_len: usize,
}

impl Reassembler {
    /// Create a reassembler enforcing `MAX_DATA_LEN`.
    pub fn new() -> Self {
        Self::with_max_data_len(MAX_DATA_LEN)
    }

    /// Create a reassembler with a narrower payload bound.
    ///
    /// Values above `MAX_DATA_LEN` are clamped to it.
    pub fn with_max_data_len(max_data_len: usize) -> Self {
        Self {
            state: RxState::WaitForSelfAddr,
            header: Header::default(),
            buf: [0u8; MAX_DATA_LEN],
            cursor: 0,
            max_data_len: max_data_len.min(MAX_DATA_LEN),
        }
    }

    /// Consume one byte.
    ///
    /// # Errors
    ///
    /// Returns `BadParam` if the length byte exceeds the payload bound.
    /// The machine is back in `WaitForSelfAddr` when that happens.
    pub fn step(&mut self, byte: u8) -> Result<Step<'_>> {
        match self.state {
            RxState::WaitForSelfAddr => {
                self.header.source = byte;
                self.state = RxState::WaitForDestAddr;
            }
            RxState::WaitForDestAddr => {
                self.header.destination = byte;
                self.state = RxState::WaitForOpCode;
            }
            RxState::WaitForOpCode => {
                self.header.op_code = byte;
                self.state = RxState::WaitForLen;
            }
            RxState::WaitForLen => {
                self.header.length = byte;

                if byte as usize > self.max_data_len {
                    self.reset();
                    return Err(HomebusError::BadParam(format!(
                        "Payload length {} exceeds maximum {}",
                        byte, self.max_data_len
                    )));
                }

                if byte == 0 {
                    self.state = RxState::WaitForSelfAddr;
                    return Ok(Step::Complete(PacketRef::new(self.header, &[])));
                }

                self.cursor = 0;
                self.state = RxState::WaitForData;
            }
            RxState::WaitForData => {
                self.buf[self.cursor] = byte;
                self.cursor += 1;

                if self.cursor == self.header.length as usize {
                    let len = self.cursor;
                    self.cursor = 0;
                    self.state = RxState::WaitForSelfAddr;
                    return Ok(Step::Complete(PacketRef::new(
                        self.header,
                        &self.buf[..len],
                    )));
                }
            }
        }

        Ok(Step::Pending)
    }

    /// Drop any partial frame and return to `WaitForSelfAddr`.
    pub fn reset(&mut self) {
        self.state = RxState::WaitForSelfAddr;
        self.cursor = 0;
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> RxState {
        self.state
    }

    /// Payload bytes accepted for the frame in progress.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// True when no partial frame is buffered.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.state == RxState::WaitForSelfAddr
    }

    /// Enforced payload bound.
    #[inline]
    pub fn max_data_len(&self) -> usize {
        self.max_data_len
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}
