//! # homebus
//!
//! Framing layer for a two-wire home bus.
//!
//! Frames are `[source][destination][op code][length][payload]` with no
//! delimiter or checksum. Bytes arrive one at a time from a transceiver
//! and are reassembled by a five-state machine that never blocks, enforces
//! the payload bound and recovers from malformed frames.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): header, packets, reassembly state machine
//! - **Endpoint** ([`Endpoint`]): one node; owns the reassembler, the
//!   receive handler and the transmit sink
//! - **Transceiver** ([`transceiver`]): half-duplex line driver and its
//!   receive buffer
//! - **Async glue** ([`transport`], [`writer`]): feed an endpoint from a
//!   tokio stream and write frames from a dedicated task
//!
//! ## Example
//!
//! ```
//! use homebus::transceiver::{SharedBus, Transceiver};
//! use homebus::{Endpoint, EndpointConfig};
//!
//! let bus = SharedBus::new();
//! let master_io = Transceiver::init(bus.attach().unwrap(), 64).unwrap();
//! let slave_io = Transceiver::init(bus.attach().unwrap(), 64).unwrap();
//! let slave_rx = slave_io.rx_queue();
//!
//! let mut master = Endpoint::builder()
//!     .self_address(0x10)
//!     .tx_sink(master_io)
//!     .build()
//!     .unwrap();
//!
//! let mut slave = Endpoint::builder()
//!     .self_address(0x00)
//!     .tx_sink(slave_io)
//!     .on_packet(|packet, ctx| ctx.reply(90, &[packet.op_code()]))
//!     .build()
//!     .unwrap();
//!
//! master.send_to(0x00, 42, &[]).unwrap();
//! slave.drain(&slave_rx).unwrap();
//! assert_eq!(slave.stats().frames_sent, 1);
//! ```

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transceiver;
pub mod transport;
pub mod writer;

pub use endpoint::{Endpoint, EndpointBuilder, EndpointConfig, EndpointStats, RxFilter};
pub use error::{HomebusError, Result};
pub use handler::{ReplyContext, RxHandler, TxSink};
pub use protocol::{Packet, PacketRef};
