//! Handler module - receive callbacks and transmit sinks.
//!
//! Provides:
//! - [`RxHandler`] - consumer of reassembled packets
//! - [`TxSink`] - byte sink that puts encoded frames on the bus
//! - [`ReplyContext`] - lets a receive handler transmit from inside the callback
//! - [`QueueHandler`] - hands packets to a task through a bounded channel
//!
//! # Example
//!
//! ```
//! use homebus::Endpoint;
//!
//! let mut endpoint = Endpoint::builder()
//!     .self_address(0x00)
//!     .on_transmit(|frame: &[u8]| {
//!         assert_eq!(frame[2], 90);
//!         Ok(())
//!     })
//!     .on_packet(|packet, ctx| ctx.reply(90, &[packet.op_code()]))
//!     .build()
//!     .unwrap();
//!
//! endpoint.received_slice(&[0x10, 0x00, 42, 0]).unwrap();
//! ```

mod callback;
mod context;

pub use callback::{FnHandler, FnSink, HandlerResult, QueueHandler, RxHandler, TxSink};
pub use context::ReplyContext;

pub(crate) use context::transmit_packet;
