//! Line driver for MAX22088/MAX22288-style home bus transceivers.
//!
//! The chip is half duplex: its reset line doubles as the transmitter
//! enable, so every transmission is bracketed by enabling and disabling it.
//! Received bytes are pushed by the IO layer into a bounded buffer and
//! pulled by the protocol stack.
//!
//! ```text
//! IO layer ──data_received──► RxFifo ──read──► Endpoint::received
//! Endpoint::send ──TxSink──► Transceiver::transmit ──► IO layer write
//! ```

use thiserror::Error;

use super::{RxProducer, RxQueue};
use crate::error::{HomebusError, Result};
use crate::handler::TxSink;

/// Driver status codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransceiverError {
    /// No received data is buffered.
    #[error("Rx buffer empty")]
    RxBufferEmpty,

    /// The receive buffer cannot take more data.
    #[error("Rx buffer full")]
    RxBufferFull,

    /// Parameter invalid.
    #[error("Bad parameter: {0}")]
    BadParam(String),

    /// Error in the IO layer implementation.
    #[error("IO layer error: {0}")]
    UserFn(String),

    /// Internal driver error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Hardware access used by the driver.
pub trait IoLayer: Send {
    /// Prepare the hardware. `rx` is where received bytes must be pushed.
    fn init(&mut self, rx: RxProducer) -> std::result::Result<(), TransceiverError> {
        let _ = rx;
        Ok(())
    }

    /// Drive the reset line; `true` enables the transmitter.
    fn set_reset(&mut self, tx_enabled: bool) -> std::result::Result<(), TransceiverError>;

    /// Put bytes on the line. Only called while the transmitter is enabled.
    fn write(&mut self, data: &[u8]) -> std::result::Result<(), TransceiverError>;

    /// Release the hardware.
    fn deinit(&mut self) -> std::result::Result<(), TransceiverError> {
        Ok(())
    }
}

/// Transceiver driver.
#[derive(Debug)]
pub struct Transceiver<L: IoLayer> {
    io: L,
    rx: RxQueue,
    tx_enabled: bool,
}

impl<L: IoLayer> Transceiver<L> {
    /// Initialize the IO layer and leave the transmitter disabled.
    ///
    /// # Errors
    ///
    /// - `BadParam` if `rx_buffer_len` is zero
    /// - `UserFn` if the IO layer fails to initialize or to disable the
    ///   transmitter (the IO layer is de-initialized again in that case)
    pub fn init(mut io: L, rx_buffer_len: usize) -> std::result::Result<Self, TransceiverError> {
        if rx_buffer_len == 0 {
            return Err(TransceiverError::BadParam(
                "rx buffer length must be non-zero".to_string(),
            ));
        }

        let rx = RxQueue::with_capacity(rx_buffer_len);
        io.init(rx.producer())
            .map_err(|e| TransceiverError::UserFn(format!("init failed: {}", e)))?;

        let mut driver = Self {
            io,
            rx,
            tx_enabled: true,
        };

        if let Err(e) = driver.set_tx_state(false) {
            let _ = driver.io.deinit();
            return Err(TransceiverError::UserFn(format!(
                "disabling transmitter failed: {}",
                e
            )));
        }

        Ok(driver)
    }

    /// Enable or disable the transmitter.
    pub fn set_tx_state(&mut self, enabled: bool) -> std::result::Result<(), TransceiverError> {
        self.io.set_reset(enabled)?;
        self.tx_enabled = enabled;
        Ok(())
    }

    /// Whether the transmitter is currently enabled.
    #[inline]
    pub fn tx_enabled(&self) -> bool {
        self.tx_enabled
    }

    /// Enable the transmitter, write `data`, disable the transmitter.
    ///
    /// The transmitter is disabled again even when the write fails, so a
    /// failed transmission does not keep the bus driven.
    pub fn transmit(&mut self, data: &[u8]) -> std::result::Result<(), TransceiverError> {
        if data.is_empty() {
            return Err(TransceiverError::BadParam(
                "nothing to transmit".to_string(),
            ));
        }

        self.set_tx_state(true)?;
        let written = self.write(data);
        let disabled = self.set_tx_state(false);
        written?;
        disabled
    }

    /// Raw write; requires the transmitter to be enabled.
    pub fn write(&mut self, data: &[u8]) -> std::result::Result<(), TransceiverError> {
        if !self.tx_enabled {
            return Err(TransceiverError::Internal(
                "write with transmitter disabled".to_string(),
            ));
        }
        self.io.write(data)
    }

    /// Read one received byte.
    pub fn read(&self) -> std::result::Result<u8, TransceiverError> {
        self.rx.read()
    }

    /// True if a received byte is buffered.
    pub fn is_available(&self) -> bool {
        self.rx.is_available()
    }

    /// Discard buffered received bytes.
    pub fn flush_rx(&self) -> std::result::Result<(), TransceiverError> {
        self.rx.flush()
    }

    /// Consumer handle onto the receive buffer.
    pub fn rx_queue(&self) -> RxQueue {
        self.rx.clone()
    }

    /// Producer handle, for IO layers that deliver bytes after init.
    pub fn rx_producer(&self) -> RxProducer {
        self.rx.producer()
    }

    pub fn io(&self) -> &L {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut L {
        &mut self.io
    }

    /// Release the IO layer and drop buffered data.
    pub fn deinit(mut self) -> std::result::Result<(), TransceiverError> {
        let flushed = self.rx.flush();
        let released = self.io.deinit();
        match (flushed, released) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), _) | (_, Err(e)) => Err(TransceiverError::Internal(format!(
                "deinit failed: {}",
                e
            ))),
        }
    }
}

impl<L: IoLayer> TxSink for Transceiver<L> {
    fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        Transceiver::transmit(self, frame).map_err(HomebusError::from)
    }
}
