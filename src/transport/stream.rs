//! Receive loop over an async byte stream.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::endpoint::{Endpoint, EndpointStats};
use crate::error::{HomebusError, Result};

/// Default read buffer size. Frames are small, so reads are too.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 256;

/// Configuration for [`receive_loop`].
#[derive(Debug, Clone)]
pub struct ReceiveConfig {
    /// Size of the buffer passed to each read.
    pub read_buffer_size: usize,
    /// Drop a partial frame when no byte arrives for this long.
    /// Falls back to the endpoint's own idle timeout when unset.
    pub idle_timeout: Option<Duration>,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            idle_timeout: None,
        }
    }
}

/// Read from `reader` until EOF, feeding every byte to `endpoint`.
///
/// Framing and handler errors are logged and reception continues, since
/// the endpoint has already recovered from them. Returns the endpoint's
/// counters at EOF.
///
/// # Errors
///
/// `Io` if a read fails.
pub async fn receive_loop<R>(
    mut reader: R,
    endpoint: &mut Endpoint,
    config: ReceiveConfig,
) -> Result<EndpointStats>
where
    R: AsyncRead + Unpin,
{
    let idle_timeout = config
        .idle_timeout
        .or_else(|| endpoint.config().idle_timeout());
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];

    loop {
        let read = match idle_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, reader.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    endpoint.expire_partial_frame();
                    continue;
                }
            },
            None => reader.read(&mut buf).await,
        };

        let n = match read {
            Ok(0) => {
                tracing::debug!(
                    "Stream closed at {:#04x} in state {}",
                    endpoint.self_address(),
                    endpoint.rx_state().as_str()
                );
                return Ok(endpoint.stats());
            }
            Ok(n) => n,
            Err(e) => {
                tracing::error!("Read failed at {:#04x}: {}", endpoint.self_address(), e);
                return Err(HomebusError::Io(e));
            }
        };

        for &byte in &buf[..n] {
            if let Err(e) = endpoint.received(byte) {
                tracing::debug!("Frame error at {:#04x}: {}", endpoint.self_address(), e);
            }
        }
    }
}
