//! Reply context for receive handlers.
//!
//! A receive handler runs inside the endpoint's byte-delivery call, while
//! the endpoint is mutably borrowed. [`ReplyContext`] lends the handler the
//! endpoint's transmit sink so it can answer without re-entering the endpoint:
//!
//! ```ignore
//! endpoint.on_packet(|packet, ctx| {
//!     if packet.op_code() == REQUEST {
//!         ctx.reply(RESPONSE, &[status])?;
//!     }
//!     Ok(())
//! });
//! ```

use super::TxSink;
use crate::error::{HomebusError, Result};
use crate::protocol::{encode_frame_into, Packet, MAX_FRAME_SIZE};

/// Transmit access handed to a receive handler.
pub struct ReplyContext<'a> {
    /// Address of the receiving endpoint.
    self_address: u8,
    /// Source address of the packet being handled.
    peer: u8,
    /// Payload bound of the receiving endpoint.
    max_data_len: usize,
    /// Endpoint's sink, if one is registered.
    sink: Option<&'a mut dyn TxSink>,
    /// Frames sent through this context.
    sent: usize,
}

impl<'a> ReplyContext<'a> {
    pub(crate) fn new(
        self_address: u8,
        peer: u8,
        max_data_len: usize,
        sink: Option<&'a mut dyn TxSink>,
    ) -> Self {
        Self {
            self_address,
            peer,
            max_data_len,
            sink,
            sent: 0,
        }
    }

    /// Create a context without a sink. Every send fails with
    /// `TxUnregistered`.
    pub fn detached(self_address: u8, peer: u8) -> Self {
        Self::new(self_address, peer, crate::protocol::MAX_DATA_LEN, None)
    }

    /// Address of the receiving endpoint.
    #[inline]
    pub fn self_address(&self) -> u8 {
        self.self_address
    }

    /// Source address of the packet being handled.
    #[inline]
    pub fn peer(&self) -> u8 {
        self.peer
    }

    /// Frames sent through this context so far.
    #[inline]
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Send an arbitrary packet.
    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        transmit_packet(self.sink.as_deref_mut(), packet, self.max_data_len)?;
        self.sent += 1;
        Ok(())
    }

    /// Send a packet from this endpoint to `destination`.
    pub fn send_to(&mut self, destination: u8, op_code: u8, data: &[u8]) -> Result<()> {
        let packet = Packet::from_slice(self.self_address, destination, op_code, data);
        self.send(&packet)
    }

    /// Send a packet back to the source of the packet being handled.
    pub fn reply(&mut self, op_code: u8, data: &[u8]) -> Result<()> {
        self.send_to(self.peer, op_code, data)
    }
}

/// Validate, encode and hand one packet to a sink.
///
/// Errors: `BadParam` for an oversized payload, `TxUnregistered` without a
/// sink, `CallbackFailed` wrapping the sink's own error.
pub(crate) fn transmit_packet(
    sink: Option<&mut (dyn TxSink + '_)>,
    packet: &Packet,
    max_data_len: usize,
) -> Result<()> {
    let mut buf = [0u8; MAX_FRAME_SIZE];
    let size = encode_frame_into(packet, max_data_len, &mut buf)?;

    let sink = sink.ok_or(HomebusError::TxUnregistered)?;

    sink.transmit(&buf[..size]).map_err(|e| {
        tracing::warn!(
            "Transmit failed for frame {:#04x} -> {:#04x} op {}: {}",
            packet.source,
            packet.destination,
            packet.op_code,
            e
        );
        HomebusError::callback(e)
    })?;

    tracing::debug!(
        "Sent frame {:#04x} -> {:#04x} op {} ({} bytes)",
        packet.source,
        packet.destination,
        packet.op_code,
        size
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::FnSink;

    #[test]
    fn test_detached_context_unregistered() {
        let mut ctx = ReplyContext::detached(0x00, 0x10);
        let err = ctx.reply(90, &[1]).unwrap_err();
        assert!(matches!(err, HomebusError::TxUnregistered));
        assert_eq!(ctx.sent(), 0);
    }

    #[test]
    fn test_reply_addresses_peer() {
        let mut frames: Vec<Vec<u8>> = Vec::new();
        let mut sink = FnSink(|frame: &[u8]| -> Result<()> {
            frames.push(frame.to_vec());
            Ok(())
        });

        {
            let mut ctx = ReplyContext::new(0x00, 0x10, 8, Some(&mut sink));
            ctx.reply(90, &[1]).unwrap();
            ctx.send_to(0x20, 7, &[]).unwrap();
            assert_eq!(ctx.sent(), 2);
        }

        drop(sink);
        assert_eq!(frames, vec![vec![0x00, 0x10, 90, 1, 1], vec![0x00, 0x20, 7, 0]]);
    }

    #[test]
    fn test_reply_respects_payload_bound() {
        let mut sink = FnSink(|_: &[u8]| -> Result<()> { Ok(()) });
        let mut ctx = ReplyContext::new(0x00, 0x10, 2, Some(&mut sink));

        assert!(ctx.reply(1, &[0, 1, 2]).unwrap_err().is_bad_param());
        assert_eq!(ctx.sent(), 0);
    }

    #[test]
    fn test_sink_failure_wrapped() {
        let mut sink = FnSink(|_: &[u8]| -> Result<()> { Err(HomebusError::QueueFull) });

        let err = transmit_packet(Some(&mut sink), &Packet::empty(1, 2, 3), 8).unwrap_err();
        match err {
            HomebusError::CallbackFailed(inner) => {
                assert!(matches!(*inner, HomebusError::QueueFull))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bad_param_checked_before_sink() {
        let packet = Packet::from_slice(1, 2, 3, &[0u8; 9]);
        assert!(transmit_packet(None, &packet, 8).unwrap_err().is_bad_param());
    }
}
