//! Software UART line coding for bit-banged transceivers.
//!
//! A home bus character is 11 bits sent LSB first: a low start bit, eight
//! data bits, a parity bit and a high stop bit. Every bit is followed by an
//! off-duty half period where the line is released (high), so one character
//! occupies 22 half-bit slots on the wire:
//!
//! ```text
//! slot   0   1   2   3  ...  16  17  18  19  20  21
//!       ┌───┬───┬───┬───┬   ┬───┬───┬───┬───┬───┬───┐
//!       │ S │ 1 │D0 │ 1 │...│D7 │ 1 │ P │ 1 │ E │ 1 │
//!       └───┴───┴───┴───┴   ┴───┴───┴───┴───┴───┴───┘
//! S = start (0), D = data, P = parity, E = stop (1), 1 = off-duty gap
//! ```
//!
//! Only the timer and GPIO plumbing is hardware specific. This module holds
//! the rest: [`encode_byte`] and [`BitWriter`] for transmission with
//! read-back collision checks, and [`RxSampler`] for decoding the sampled
//! line one half-bit slot at a time.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Half-bit slots per character.
pub const SAMPLES_PER_BYTE: usize = 22;

const START_SLOT: usize = 0;
const PARITY_SLOT: usize = 18;
const STOP_SLOT: usize = 20;

/// Parity bit for `value`: chosen so the eight data bits plus the parity
/// bit hold an even number of zeroes.
#[inline]
pub fn even_parity(value: u8) -> bool {
    value.count_zeros() % 2 == 0
}

/// Interleave the low 11 bits of `value` with high off-duty bits.
///
/// Bit `i` of the input lands at bit `2 * i` of the result; every odd bit
/// of the result is 1.
pub fn stuff_bits(value: u16) -> u32 {
    (0..11).fold(0u32, |acc, i| {
        let bit = u32::from((value >> i) & 1);
        acc | (bit << (2 * i)) | (1 << (2 * i + 1))
    })
}

/// Line levels for one character, LSB (start slot) first.
pub fn encode_byte(value: u8) -> u32 {
    let mut frame = u16::from(value);
    frame |= u16::from(even_parity(value)) << 8;
    frame |= 1 << 9;
    stuff_bits(frame << 1)
}

/// Length of one half-bit slot at `baud` bits per second.
pub fn slot_period(baud: u32) -> Option<Duration> {
    if baud == 0 {
        return None;
    }
    Some(Duration::from_nanos(500_000_000 / u64::from(baud)))
}

/// Which checks a received character failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFaults {
    /// Start slot sampled high.
    pub start: bool,
    /// Parity slot disagrees with the data bits.
    pub parity: bool,
    /// Stop slot sampled low.
    pub stop: bool,
    /// An off-duty slot sampled low.
    pub gap: bool,
}

impl FrameFaults {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for FrameFaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (self.start, "start"),
            (self.parity, "parity"),
            (self.stop, "stop"),
            (self.gap, "gap"),
        ];
        let mut first = true;
        for (_, name) in names.iter().filter(|(set, _)| *set) {
            if !first {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
            first = false;
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

/// Line coding errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LineError {
    /// A sample arrived without a start edge.
    #[error("sample outside a character")]
    Idle,

    /// A start edge arrived while a character was being sampled.
    #[error("start edge during a character")]
    Busy,

    /// The character failed one or more line checks.
    #[error("bad character {data:#04x}: {faults}")]
    BadFrame { data: u8, faults: FrameFaults },

    /// The line read back differently from what was driven.
    #[error("collision on byte {byte} slot {slot}: drove {driven}, read {sampled}")]
    Collision {
        byte: usize,
        slot: usize,
        driven: bool,
        sampled: bool,
    },
}

/// Outcome of feeding one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampled {
    /// More slots needed.
    Pending,
    /// A character passed every check.
    Byte(u8),
}

/// Counters kept by [`RxSampler`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub frames_valid: u64,
    pub frames_bad: u64,
    pub start_faults: u64,
    pub parity_faults: u64,
    pub stop_faults: u64,
    pub gap_faults: u64,
}

/// Receive state machine for one character.
///
/// The falling edge of the start bit arms the sampler; the timer then feeds
/// one sample per half-bit slot. After [`SAMPLES_PER_BYTE`] samples the
/// character is returned, or rejected with the faults it collected, and the
/// sampler waits for the next edge.
#[derive(Debug, Default)]
pub struct RxSampler {
    receiving: bool,
    slot: usize,
    data: u8,
    data_bits: u8,
    faults: FrameFaults,
    stats: SamplerStats,
}

impl RxSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Falling edge of a start bit.
    pub fn start_edge(&mut self) -> Result<(), LineError> {
        if self.receiving {
            return Err(LineError::Busy);
        }
        self.receiving = true;
        Ok(())
    }

    /// Whether a character is being sampled.
    #[inline]
    pub fn is_receiving(&self) -> bool {
        self.receiving
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    /// Feed the line level of the current slot.
    pub fn sample(&mut self, level: bool) -> Result<Sampled, LineError> {
        if !self.receiving {
            return Err(LineError::Idle);
        }

        match self.slot {
            slot if slot % 2 == 1 => self.faults.gap |= !level,
            START_SLOT => self.faults.start |= level,
            PARITY_SLOT => self.faults.parity |= level != even_parity(self.data),
            STOP_SLOT => self.faults.stop |= !level,
            _ => {
                if level {
                    self.data |= 1 << self.data_bits;
                }
                self.data_bits += 1;
            }
        }

        self.slot += 1;
        if self.slot < SAMPLES_PER_BYTE {
            return Ok(Sampled::Pending);
        }

        let (data, faults) = (self.data, self.faults);
        self.reset();
        if faults.is_clean() {
            self.stats.frames_valid += 1;
            return Ok(Sampled::Byte(data));
        }

        self.stats.frames_bad += 1;
        self.stats.start_faults += u64::from(faults.start);
        self.stats.parity_faults += u64::from(faults.parity);
        self.stats.stop_faults += u64::from(faults.stop);
        self.stats.gap_faults += u64::from(faults.gap);
        Err(LineError::BadFrame { data, faults })
    }

    /// Abandon the character in progress.
    pub fn reset(&mut self) {
        self.receiving = false;
        self.slot = 0;
        self.data = 0;
        self.data_bits = 0;
        self.faults = FrameFaults::default();
    }
}

/// Transmit side: yields line levels slot by slot and checks each one
/// against what the line reads back.
///
/// The bus is wired-AND, so a node driving high while another drives low
/// reads back low.
#[derive(Debug)]
pub struct BitWriter {
    words: Vec<u32>,
    byte: usize,
    slot: usize,
    driven: Option<bool>,
}

impl BitWriter {
    pub fn new(data: &[u8]) -> Self {
        Self {
            words: data.iter().map(|&b| encode_byte(b)).collect(),
            byte: 0,
            slot: 0,
            driven: None,
        }
    }

    /// Level to drive next, or `None` once every character is out.
    pub fn next_level(&mut self) -> Option<bool> {
        let word = *self.words.get(self.byte)?;
        let level = word & (1 << self.slot) != 0;
        self.driven = Some(level);
        Some(level)
    }

    /// Compare the sampled line with the level just driven and advance.
    pub fn readback(&mut self, sampled: bool) -> Result<(), LineError> {
        let Some(driven) = self.driven.take() else {
            return Ok(());
        };
        let (byte, slot) = (self.byte, self.slot);

        self.slot += 1;
        if self.slot == SAMPLES_PER_BYTE {
            self.slot = 0;
            self.byte += 1;
        }

        check_collision(driven, sampled).map_err(|_| LineError::Collision {
            byte,
            slot,
            driven,
            sampled,
        })
    }

    pub fn is_done(&self) -> bool {
        self.byte >= self.words.len()
    }
}

/// A collision is a driven level that does not read back.
#[inline]
pub fn check_collision(driven: bool, sampled: bool) -> Result<(), LineError> {
    if driven == sampled {
        return Ok(());
    }
    Err(LineError::Collision {
        byte: 0,
        slot: 0,
        driven,
        sampled,
    })
}
