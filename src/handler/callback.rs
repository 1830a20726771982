//! Receive handler and transmit sink traits.
//!
//! Both run synchronously on the caller's execution context: the receive
//! handler from inside the byte-delivery call, the sink from inside a send.
//! Neither may block. A handler that needs to do real work should copy the
//! packet out (see [`QueueHandler`]) and return.

use tokio::sync::mpsc;

use super::ReplyContext;
use crate::error::{HomebusError, Result};
use crate::protocol::{Packet, PacketRef};

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Consumer of reassembled packets.
pub trait RxHandler: Send {
    /// Handle one packet. The payload is only valid during this call.
    ///
    /// Returning an error makes the endpoint report `CallbackFailed`.
    fn on_packet(&mut self, packet: &PacketRef<'_>, ctx: &mut ReplyContext<'_>) -> HandlerResult;
}

/// Sink for encoded frames.
pub trait TxSink: Send {
    /// Write one complete frame.
    ///
    /// Partial writes are not rolled back by the endpoint.
    fn transmit(&mut self, frame: &[u8]) -> Result<()>;
}

/// Adapter turning a closure into an [`RxHandler`].
pub struct FnHandler<F>(pub F);

impl<F> RxHandler for FnHandler<F>
where
    F: FnMut(&PacketRef<'_>, &mut ReplyContext<'_>) -> HandlerResult + Send,
{
    fn on_packet(&mut self, packet: &PacketRef<'_>, ctx: &mut ReplyContext<'_>) -> HandlerResult {
        (self.0)(packet, ctx)
    }
}

/// Adapter turning a closure into a [`TxSink`].
pub struct FnSink<F>(pub F);

impl<F> TxSink for FnSink<F>
where
    F: FnMut(&[u8]) -> Result<()> + Send,
{
    fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        (self.0)(frame)
    }
}

/// Receive handler that copies packets into a bounded channel.
///
/// Never waits for channel capacity: a full queue fails the callback so
/// the byte-delivery path stays non-blocking.
#[derive(Debug, Clone)]
pub struct QueueHandler {
    tx: mpsc::Sender<Packet>,
}

impl QueueHandler {
    /// Wrap an existing channel sender.
    pub fn new(tx: mpsc::Sender<Packet>) -> Self {
        Self { tx }
    }

    /// Create a handler and the receiver for the packets it forwards.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl RxHandler for QueueHandler {
    fn on_packet(&mut self, packet: &PacketRef<'_>, _ctx: &mut ReplyContext<'_>) -> HandlerResult {
        self.tx
            .try_send(packet.to_owned_packet())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => HomebusError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => HomebusError::ChannelClosed,
            })
    }
}
