//! Transport module - async byte stream glue.
//!
//! Feeds an endpoint from any `tokio::io::AsyncRead` (serial port, socket,
//! in-memory duplex). The outbound direction is handled by
//! [`crate::writer`].

mod stream;

pub use stream::{receive_loop, ReceiveConfig, DEFAULT_READ_BUFFER_SIZE};
