//! Transceiver driver layer.
//!
//! - [`Transceiver`]: half-duplex line driver over a pluggable [`IoLayer`]
//! - [`RxQueue`] / [`RxProducer`]: bounded receive buffer between the IO
//!   layer and the protocol stack
//! - [`SharedBus`]: in-memory line for wiring nodes together in one process
//! - [`bitbang`]: software UART line coding for GPIO-driven transceivers

pub mod bitbang;
mod bus;
mod driver;
mod fifo;

pub use bus::{BusIo, SharedBus};
pub use driver::{IoLayer, Transceiver, TransceiverError};
pub use fifo::{RxFifo, RxProducer, RxQueue};
