//! Error types for homebus.

use thiserror::Error;

use crate::transceiver::TransceiverError;

/// Main error type for all homebus operations.
#[derive(Debug, Error)]
pub enum HomebusError {
    /// Out-of-contract value from the caller or from the wire
    /// (declared length above the payload bound, invalid config, ...).
    #[error("Bad parameter: {0}")]
    BadParam(String),

    /// A registered receive handler or transmit sink reported failure.
    #[error("Callback failed: {0}")]
    CallbackFailed(#[source] Box<HomebusError>),

    /// Send attempted with no transmit sink registered.
    #[error("Transmit sink not registered")]
    TxUnregistered,

    /// Transceiver driver error.
    #[error("Transceiver error: {0}")]
    Transceiver(#[from] TransceiverError),

    /// I/O error on an async byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Packet queue is full.
    #[error("Queue full")]
    QueueFull,

    /// Receiving side of a packet or frame channel is gone.
    #[error("Channel closed")]
    ChannelClosed,
}

impl HomebusError {
    /// Wrap an error reported by a handler or sink.
    ///
    /// An error that is already `CallbackFailed` is returned unchanged.
    pub(crate) fn callback(source: HomebusError) -> Self {
        match source {
            HomebusError::CallbackFailed(_) => source,
            other => HomebusError::CallbackFailed(Box::new(other)),
        }
    }

    /// True for [`HomebusError::BadParam`].
    pub fn is_bad_param(&self) -> bool {
        matches!(self, HomebusError::BadParam(_))
    }

    /// True for [`HomebusError::CallbackFailed`].
    pub fn is_callback_failed(&self) -> bool {
        matches!(self, HomebusError::CallbackFailed(_))
    }
}

/// Result type alias using HomebusError.
pub type Result<T> = std::result::Result<T, HomebusError>;
