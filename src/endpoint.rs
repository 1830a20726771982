//! Bus endpoint: one node's view of the bus.
//!
//! An [`Endpoint`] binds a self address, a transmit sink, a receive handler
//! and one [`Reassembler`]. The caller feeds it every received byte through
//! [`Endpoint::received`] and sends packets through [`Endpoint::send`].
//!
//! Nothing here blocks or locks. Byte delivery for one endpoint must be
//! serialized by the caller, which `&mut self` enforces.
//!
//! # Example
//!
//! ```
//! use homebus::{Endpoint, EndpointConfig};
//! use homebus::handler::QueueHandler;
//!
//! let (handler, mut packets) = QueueHandler::channel(8);
//! let mut endpoint = Endpoint::builder()
//!     .self_address(0x02)
//!     .config(EndpointConfig::default().with_max_data_len(8))
//!     .rx_handler(handler)
//!     .build()
//!     .unwrap();
//!
//! endpoint
//!     .received_slice(&[0x01, 0x02, 0x10, 0x03, 0xAA, 0xBB, 0xCC])
//!     .unwrap();
//!
//! let packet = packets.try_recv().unwrap();
//! assert_eq!(packet.payload(), &[0xAA, 0xBB, 0xCC]);
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{HomebusError, Result};
use crate::handler::{
    transmit_packet, FnHandler, FnSink, HandlerResult, ReplyContext, RxHandler, TxSink,
};
use crate::protocol::{Packet, PacketRef, Reassembler, RxState, Step, MAX_DATA_LEN};
use crate::transceiver::{RxQueue, TransceiverError};

/// Which completed frames reach the receive handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RxFilter {
    /// Every reassembled frame.
    #[default]
    All,
    /// Frames whose destination is this endpoint or the broadcast address.
    AddressedToSelf,
}

impl RxFilter {
    fn accepts(&self, destination: u8, self_address: u8, broadcast: Option<u8>) -> bool {
        match self {
            RxFilter::All => true,
            RxFilter::AddressedToSelf => {
                destination == self_address || broadcast == Some(destination)
            }
        }
    }
}

/// Endpoint configuration.
///
/// Every field has a default, so a partial JSON document is accepted:
///
/// ```
/// use homebus::{EndpointConfig, RxFilter};
///
/// let config = EndpointConfig::from_json(r#"{ "filter": "addressed_to_self" }"#).unwrap();
/// assert_eq!(config.filter, RxFilter::AddressedToSelf);
/// assert_eq!(config.max_data_len, homebus::protocol::MAX_DATA_LEN);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Payload bound enforced on receive and send, `1..=MAX_DATA_LEN`.
    pub max_data_len: usize,
    /// Dispatch filter.
    pub filter: RxFilter,
    /// Address accepted by every node under `RxFilter::AddressedToSelf`.
    pub broadcast_address: Option<u8>,
    /// Drop a partial frame after this long without a byte.
    pub idle_timeout_ms: Option<u64>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            max_data_len: MAX_DATA_LEN,
            filter: RxFilter::All,
            broadcast_address: None,
            idle_timeout_ms: None,
        }
    }
}

impl EndpointConfig {
    /// Parse a configuration from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if self.max_data_len == 0 || self.max_data_len > MAX_DATA_LEN {
            return Err(HomebusError::BadParam(format!(
                "max_data_len {} outside 1..={}",
                self.max_data_len, MAX_DATA_LEN
            )));
        }
        if self.idle_timeout_ms == Some(0) {
            return Err(HomebusError::BadParam(
                "idle_timeout_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_data_len(mut self, max_data_len: usize) -> Self {
        self.max_data_len = max_data_len;
        self
    }

    pub fn with_filter(mut self, filter: RxFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_broadcast_address(mut self, address: u8) -> Self {
        self.broadcast_address = Some(address);
        self
    }

    /// Sub-millisecond remainders round up, so only a zero duration is
    /// rejected by `validate`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        let partial = u128::from(timeout.subsec_nanos() % 1_000_000 != 0);
        let millis = timeout.as_millis() + partial;
        self.idle_timeout_ms = Some(u64::try_from(millis).unwrap_or(u64::MAX));
        self
    }

    /// Idle timeout as a `Duration`.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }
}

/// Endpoint counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStats {
    /// Bytes fed through `received`.
    pub bytes_received: u64,
    /// Frames handed to the receive handler.
    pub frames_dispatched: u64,
    /// Frames dropped by the address filter.
    pub frames_filtered: u64,
    /// Frames completed while no receive handler was registered.
    pub frames_unhandled: u64,
    /// Length bytes above the payload bound.
    pub length_errors: u64,
    /// Receive handler or transmit sink failures.
    pub callback_failures: u64,
    /// Partial frames dropped by the idle timeout.
    pub idle_resets: u64,
    /// Frames accepted by the transmit sink.
    pub frames_sent: u64,
}

/// Builder for [`Endpoint`].
#[derive(Default)]
pub struct EndpointBuilder {
    self_address: Option<u8>,
    config: EndpointConfig,
    tx_sink: Option<Box<dyn TxSink>>,
    rx_handler: Option<Box<dyn RxHandler>>,
}

impl EndpointBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// This node's bus address. Required.
    pub fn self_address(mut self, address: u8) -> Self {
        self.self_address = Some(address);
        self
    }

    pub fn config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a transmit sink.
    pub fn tx_sink<S: TxSink + 'static>(mut self, sink: S) -> Self {
        self.tx_sink = Some(Box::new(sink));
        self
    }

    /// Register a closure as the transmit sink.
    pub fn on_transmit<F>(self, f: F) -> Self
    where
        F: FnMut(&[u8]) -> Result<()> + Send + 'static,
    {
        self.tx_sink(FnSink(f))
    }

    /// Register a receive handler.
    pub fn rx_handler<H: RxHandler + 'static>(mut self, handler: H) -> Self {
        self.rx_handler = Some(Box::new(handler));
        self
    }

    /// Register a closure as the receive handler.
    pub fn on_packet<F>(self, f: F) -> Self
    where
        F: FnMut(&PacketRef<'_>, &mut ReplyContext<'_>) -> HandlerResult + Send + 'static,
    {
        self.rx_handler(FnHandler(f))
    }

    /// Build the endpoint.
    ///
    /// Fails with `BadParam` if no self address was given or the
    /// configuration is invalid.
    pub fn build(self) -> Result<Endpoint> {
        let self_address = self
            .self_address
            .ok_or_else(|| HomebusError::BadParam("self address not set".to_string()))?;

        let mut endpoint = Endpoint::new(self_address, self.config)?;
        endpoint.tx_sink = self.tx_sink;
        endpoint.rx_handler = self.rx_handler;
        Ok(endpoint)
    }
}

/// One node on the bus.
pub struct Endpoint {
    self_address: u8,
    config: EndpointConfig,
    rx: Reassembler,
    rx_handler: Option<Box<dyn RxHandler>>,
    tx_sink: Option<Box<dyn TxSink>>,
    stats: EndpointStats,
    /// Arrival of the last byte, tracked only with an idle timeout.
    last_byte_at: Option<Instant>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("self_address", &self.self_address)
            .field("config", &self.config)
            .field("rx_state", &self.rx.state())
            .field("rx_handler", &self.rx_handler.is_some())
            .field("tx_sink", &self.tx_sink.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Endpoint {
    /// Create an endpoint with no handler and no sink.
    ///
    /// # Errors
    ///
    /// `BadParam` if `config` is invalid or `self_address` is the
    /// configured broadcast address.
    pub fn new(self_address: u8, config: EndpointConfig) -> Result<Self> {
        config.validate()?;
        if config.broadcast_address == Some(self_address) {
            return Err(HomebusError::BadParam(format!(
                "self address {:#04x} is the broadcast address",
                self_address
            )));
        }

        Ok(Self {
            self_address,
            rx: Reassembler::with_max_data_len(config.max_data_len),
            config,
            rx_handler: None,
            tx_sink: None,
            stats: EndpointStats::default(),
            last_byte_at: None,
        })
    }

    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::new()
    }

    /// Replace the receive handler. Reassembly state is left untouched.
    pub fn register_rx_handler<H: RxHandler + 'static>(&mut self, handler: H) {
        self.rx_handler = Some(Box::new(handler));
    }

    /// Replace the receive handler with a closure.
    pub fn on_packet<F>(&mut self, f: F)
    where
        F: FnMut(&PacketRef<'_>, &mut ReplyContext<'_>) -> HandlerResult + Send + 'static,
    {
        self.register_rx_handler(FnHandler(f));
    }

    /// Unregister the receive handler. Completed frames are then counted
    /// as unhandled.
    pub fn clear_rx_handler(&mut self) {
        self.rx_handler = None;
    }

    /// Replace the transmit sink.
    pub fn register_tx_sink<S: TxSink + 'static>(&mut self, sink: S) {
        self.tx_sink = Some(Box::new(sink));
    }

    /// Replace the transmit sink with a closure.
    pub fn on_transmit<F>(&mut self, f: F)
    where
        F: FnMut(&[u8]) -> Result<()> + Send + 'static,
    {
        self.register_tx_sink(FnSink(f));
    }

    pub fn clear_tx_sink(&mut self) {
        self.tx_sink = None;
    }

    /// Serialize `packet` and hand the whole frame to the transmit sink.
    ///
    /// # Errors
    ///
    /// - `BadParam` if the payload exceeds the configured bound
    /// - `TxUnregistered` if no sink is registered
    /// - `CallbackFailed` if the sink fails; a partial write is not rolled back
    ///
    /// Receive state is never affected.
    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        match transmit_packet(self.tx_sink.as_deref_mut(), packet, self.config.max_data_len) {
            Ok(()) => {
                self.stats.frames_sent += 1;
                Ok(())
            }
            Err(e) => {
                if e.is_callback_failed() {
                    self.stats.callback_failures += 1;
                }
                Err(e)
            }
        }
    }

    /// Send a packet from this endpoint's own address.
    pub fn send_to(&mut self, destination: u8, op_code: u8, data: &[u8]) -> Result<()> {
        let packet = Packet::from_slice(self.self_address, destination, op_code, data);
        self.send(&packet)
    }

    /// Feed one received byte.
    ///
    /// Always advances reassembly by exactly one step and never blocks.
    ///
    /// # Errors
    ///
    /// - `BadParam` if this byte is a length above the payload bound
    /// - `CallbackFailed` if the receive handler fails
    ///
    /// Reassembly is back in `WaitForSelfAddr` after either error.
    pub fn received(&mut self, byte: u8) -> Result<()> {
        self.stats.bytes_received += 1;
        if self.config.idle_timeout_ms.is_some() {
            self.last_byte_at = Some(Instant::now());
        }

        let packet = match self.rx.step(byte) {
            Ok(Step::Pending) => return Ok(()),
            Ok(Step::Complete(packet)) => packet,
            Err(e) => {
                self.stats.length_errors += 1;
                tracing::warn!("Dropping frame at {:#04x}: {}", self.self_address, e);
                return Err(e);
            }
        };

        if !self.config.filter.accepts(
            packet.destination(),
            self.self_address,
            self.config.broadcast_address,
        ) {
            self.stats.frames_filtered += 1;
            return Ok(());
        }

        let Some(handler) = self.rx_handler.as_deref_mut() else {
            self.stats.frames_unhandled += 1;
            tracing::debug!(
                "No receive handler at {:#04x}, frame op {} unhandled",
                self.self_address,
                packet.op_code()
            );
            return Ok(());
        };

        tracing::debug!(
            "Dispatching frame {:#04x} -> {:#04x} op {} ({} bytes)",
            packet.source(),
            packet.destination(),
            packet.op_code(),
            packet.length()
        );

        let sink = self.tx_sink.as_mut().map(|s| s.as_mut() as &mut dyn TxSink);
        let mut ctx = ReplyContext::new(
            self.self_address,
            packet.source(),
            self.config.max_data_len,
            sink,
        );
        let result = handler.on_packet(&packet, &mut ctx);
        self.stats.frames_sent += ctx.sent() as u64;
        self.stats.frames_dispatched += 1;

        result.map_err(|e| {
            self.stats.callback_failures += 1;
            tracing::warn!(
                "Receive handler at {:#04x} failed for op {}: {}",
                self.self_address,
                packet.op_code(),
                e
            );
            HomebusError::callback(e)
        })
    }

    /// Feed a batch of bytes.
    ///
    /// Every byte is consumed even when an earlier one fails; the first
    /// error is returned once the slice is exhausted.
    pub fn received_slice(&mut self, bytes: &[u8]) -> Result<()> {
        let mut first_err = None;
        for &byte in bytes {
            if let Err(e) = self.received(byte) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Feed every byte currently buffered by a transceiver.
    ///
    /// Returns the number of bytes consumed, or the first error after the
    /// queue is empty. A queue that cannot be read at all fails at once with
    /// `HomebusError::Transceiver`.
    pub fn drain(&mut self, queue: &RxQueue) -> Result<usize> {
        let mut count = 0;
        let mut first_err = None;
        loop {
            let byte = match queue.read() {
                Ok(byte) => byte,
                Err(TransceiverError::RxBufferEmpty) => break,
                Err(e) => {
                    tracing::error!("Rx queue read failed after {} bytes: {}", count, e);
                    return Err(HomebusError::Transceiver(e));
                }
            };
            count += 1;
            if let Err(e) = self.received(byte) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    /// Drop a partial frame whose last byte is older than the idle timeout.
    ///
    /// Returns true if a frame was dropped. Does nothing without a
    /// configured timeout.
    pub fn check_idle(&mut self, now: Instant) -> bool {
        let (Some(timeout), Some(last)) = (self.config.idle_timeout(), self.last_byte_at) else {
            return false;
        };
        if now.saturating_duration_since(last) < timeout {
            return false;
        }
        self.expire_partial_frame()
    }

    /// Drop the partial frame in progress, if any, counting it as an idle
    /// reset. Returns true if a frame was dropped.
    pub fn expire_partial_frame(&mut self) -> bool {
        if self.rx.is_idle() {
            return false;
        }
        tracing::warn!(
            "Idle timeout at {:#04x} in state {} after {} payload bytes",
            self.self_address,
            self.rx.state().as_str(),
            self.rx.cursor()
        );
        self.rx.reset();
        self.stats.idle_resets += 1;
        true
    }

    /// Drop any partial frame without counting it.
    pub fn reset_rx(&mut self) {
        self.rx.reset();
    }

    #[inline]
    pub fn rx_state(&self) -> RxState {
        self.rx.state()
    }

    #[inline]
    pub fn self_address(&self) -> u8 {
        self.self_address
    }

    #[inline]
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Snapshot of the counters.
    #[inline]
    pub fn stats(&self) -> EndpointStats {
        self.stats
    }

    pub fn has_rx_handler(&self) -> bool {
        self.rx_handler.is_some()
    }

    pub fn has_tx_sink(&self) -> bool {
        self.tx_sink.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::handler::QueueHandler;

    type Frames = Arc<Mutex<Vec<Vec<u8>>>>;

    fn capture_sink(endpoint: &mut Endpoint) -> Frames {
        let frames: Frames = Arc::default();
        let out = frames.clone();
        endpoint.on_transmit(move |frame| {
            out.lock().unwrap().push(frame.to_vec());
            Ok(())
        });
        frames
    }

    fn small() -> EndpointConfig {
        EndpointConfig::default().with_max_data_len(8)
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config = EndpointConfig::default();
        assert_eq!(config.max_data_len, MAX_DATA_LEN);
        assert_eq!(config.filter, RxFilter::All);
        assert!(config.validate().is_ok());

        assert!(config.clone().with_max_data_len(0).validate().is_err());
        assert!(config
            .clone()
            .with_max_data_len(MAX_DATA_LEN + 1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_from_json() {
        let config = EndpointConfig::from_json(
            r#"{ "max_data_len": 8, "broadcast_address": 255, "idle_timeout_ms": 50 }"#,
        )
        .unwrap();
        assert_eq!(config.max_data_len, 8);
        assert_eq!(config.broadcast_address, Some(0xFF));
        assert_eq!(config.idle_timeout(), Some(Duration::from_millis(50)));

        let err = EndpointConfig::from_json(r#"{ "max_data_len": 500 }"#).unwrap_err();
        assert!(err.is_bad_param());

        let err = EndpointConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, HomebusError::Json(_)));
    }

    #[test]
    fn test_new_rejects_broadcast_self_address() {
        let config = EndpointConfig::default().with_broadcast_address(0xFF);
        assert!(Endpoint::new(0xFF, config.clone()).unwrap_err().is_bad_param());
        assert!(Endpoint::new(0x01, config).is_ok());
    }

    #[test]
    fn test_builder_requires_address() {
        let err = Endpoint::builder().build().unwrap_err();
        assert!(err.is_bad_param());
    }

    #[test]
    fn test_builder_registers_callbacks() {
        let endpoint = Endpoint::builder()
            .self_address(0x10)
            .on_transmit(|_frame: &[u8]| Ok(()))
            .on_packet(|_packet, _ctx| Ok(()))
            .build()
            .unwrap();

        assert!(endpoint.has_tx_sink());
        assert!(endpoint.has_rx_handler());
        assert_eq!(endpoint.self_address(), 0x10);
        assert_eq!(endpoint.rx_state(), RxState::WaitForSelfAddr);
    }

    #[test]
    fn test_send_without_sink() {
        let mut endpoint = Endpoint::new(0x10, small()).unwrap();
        endpoint.received_slice(&[1, 2]).unwrap();

        let err = endpoint.send_to(0x00, 42, &[]).unwrap_err();
        assert!(matches!(err, HomebusError::TxUnregistered));
        assert_eq!(endpoint.rx_state(), RxState::WaitForOpCode);
    }

    #[test]
    fn test_send_writes_whole_frame() {
        let mut endpoint = Endpoint::new(0x10, small()).unwrap();
        let frames = capture_sink(&mut endpoint);

        endpoint.send_to(0x00, 42, &[1, 2]).unwrap();
        endpoint
            .send(&Packet::from_slice(0x33, 0x00, 7, &[]))
            .unwrap();

        assert_eq!(
            *frames.lock().unwrap(),
            vec![vec![0x10, 0x00, 42, 2, 1, 2], vec![0x33, 0x00, 7, 0]]
        );
        assert_eq!(endpoint.stats().frames_sent, 2);
    }

    #[test]
    fn test_send_rejects_oversized_payload() {
        let mut endpoint = Endpoint::new(0x10, small()).unwrap();
        let frames = capture_sink(&mut endpoint);

        let err = endpoint.send_to(0x00, 1, &[0u8; 9]).unwrap_err();
        assert!(err.is_bad_param());
        assert!(frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_send_sink_failure() {
        let mut endpoint = Endpoint::new(0x10, small()).unwrap();
        endpoint.on_transmit(|_frame| Err(HomebusError::QueueFull));

        let err = endpoint.send_to(0x00, 1, &[]).unwrap_err();
        assert!(err.is_callback_failed());
        assert_eq!(endpoint.stats().callback_failures, 1);
        assert_eq!(endpoint.stats().frames_sent, 0);
    }

    #[test]
    fn test_received_dispatches_concrete_frame() {
        let (handler, mut rx) = QueueHandler::channel(4);
        let mut endpoint = Endpoint::new(0x02, small()).unwrap();
        endpoint.register_rx_handler(handler);

        for b in [0x01, 0x02, 0x10, 0x03, 0xAA, 0xBB, 0xCC] {
            endpoint.received(b).unwrap();
        }

        let packet = rx.try_recv().unwrap();
        assert_eq!(packet, Packet::from_slice(0x01, 0x02, 0x10, &[0xAA, 0xBB, 0xCC]));
        assert!(rx.try_recv().is_err());

        let stats = endpoint.stats();
        assert_eq!(stats.bytes_received, 7);
        assert_eq!(stats.frames_dispatched, 1);
    }

    #[test]
    fn test_length_error_resets_and_recovers() {
        let (handler, mut rx) = QueueHandler::channel(4);
        let mut endpoint = Endpoint::new(0x02, small()).unwrap();
        endpoint.register_rx_handler(handler);

        let err = endpoint.received_slice(&[1, 2, 3, 9]).unwrap_err();
        assert!(err.is_bad_param());
        assert_eq!(endpoint.rx_state(), RxState::WaitForSelfAddr);

        endpoint.received_slice(&[4, 5, 6, 1, 0x77]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Packet::from_slice(4, 5, 6, &[0x77]));
        assert_eq!(endpoint.stats().length_errors, 1);
    }

    #[test]
    fn test_handler_failure_recovers() {
        let mut endpoint = Endpoint::new(0x02, small()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = seen.clone();
        endpoint.on_packet(move |packet, _ctx| {
            seen_in.lock().unwrap().push(packet.op_code());
            if packet.op_code() == 0xEE {
                return Err(HomebusError::BadParam("rejected".to_string()));
            }
            Ok(())
        });

        let err = endpoint.received_slice(&[1, 2, 0xEE, 0]).unwrap_err();
        assert!(err.is_callback_failed());
        assert_eq!(endpoint.rx_state(), RxState::WaitForSelfAddr);

        endpoint.received_slice(&[1, 2, 0x01, 1, 0x55]).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0xEE, 0x01]);
        assert_eq!(endpoint.stats().callback_failures, 1);
    }

    #[test]
    fn test_unhandled_frames_counted() {
        let mut endpoint = Endpoint::new(0x02, small()).unwrap();
        endpoint.received_slice(&[1, 2, 3, 0, 1, 2, 3, 1, 9]).unwrap();
        assert_eq!(endpoint.stats().frames_unhandled, 2);

        endpoint.on_packet(|_p, _ctx| Ok(()));
        endpoint.clear_rx_handler();
        endpoint.received_slice(&[1, 2, 3, 0]).unwrap();
        assert_eq!(endpoint.stats().frames_unhandled, 3);
    }

    #[test]
    fn test_register_keeps_partial_frame() {
        let (handler, mut rx) = QueueHandler::channel(4);
        let mut endpoint = Endpoint::new(0x02, small()).unwrap();

        endpoint.received_slice(&[1, 2, 3, 2, 0xAA]).unwrap();
        endpoint.register_rx_handler(handler);
        endpoint.received(0xBB).unwrap();

        assert_eq!(rx.try_recv().unwrap().payload(), &[0xAA, 0xBB]);
    }

    #[test]
    fn test_addressed_to_self_filter() {
        let (handler, mut rx) = QueueHandler::channel(4);
        let config = small()
            .with_filter(RxFilter::AddressedToSelf)
            .with_broadcast_address(0xFF);
        let mut endpoint = Endpoint::new(0x02, config).unwrap();
        endpoint.register_rx_handler(handler);

        endpoint.received_slice(&[1, 0x03, 1, 0]).unwrap();
        endpoint.received_slice(&[1, 0x02, 2, 0]).unwrap();
        endpoint.received_slice(&[1, 0xFF, 3, 0]).unwrap();

        assert_eq!(rx.try_recv().unwrap().op_code, 2);
        assert_eq!(rx.try_recv().unwrap().op_code, 3);
        assert!(rx.try_recv().is_err());
        assert_eq!(endpoint.stats().frames_filtered, 1);
    }

    #[test]
    fn test_reply_from_handler() {
        let mut endpoint = Endpoint::new(0x00, small()).unwrap();
        let frames = capture_sink(&mut endpoint);
        endpoint.on_packet(|packet, ctx| {
            if packet.op_code() == 42 {
                ctx.reply(90, &[1])?;
            }
            Ok(())
        });

        endpoint.received_slice(&[0x10, 0x00, 42, 0]).unwrap();

        assert_eq!(*frames.lock().unwrap(), vec![vec![0x00, 0x10, 90, 1, 1]]);
        assert_eq!(endpoint.stats().frames_sent, 1);
    }

    #[test]
    fn test_reply_without_sink_fails_callback() {
        let mut endpoint = Endpoint::new(0x00, small()).unwrap();
        endpoint.on_packet(|_packet, ctx| ctx.reply(90, &[]));

        let err = endpoint.received_slice(&[0x10, 0x00, 42, 0]).unwrap_err();
        match err {
            HomebusError::CallbackFailed(inner) => {
                assert!(matches!(*inner, HomebusError::TxUnregistered))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_received_slice_consumes_all_bytes_after_error() {
        let (handler, mut rx) = QueueHandler::channel(4);
        let mut endpoint = Endpoint::new(0x02, small()).unwrap();
        endpoint.register_rx_handler(handler);

        let err = endpoint
            .received_slice(&[1, 2, 3, 200, 4, 5, 6, 0])
            .unwrap_err();
        assert!(err.is_bad_param());
        assert_eq!(rx.try_recv().unwrap(), Packet::empty(4, 5, 6));
    }

    #[test]
    fn test_drain_reads_queue() {
        let (handler, mut rx) = QueueHandler::channel(4);
        let mut endpoint = Endpoint::new(0x02, small()).unwrap();
        endpoint.register_rx_handler(handler);

        let queue = RxQueue::with_capacity(16);
        let producer = queue.producer();
        for b in [1, 2, 3, 1, 0x42] {
            producer.data_received(b).unwrap();
        }

        assert_eq!(endpoint.drain(&queue).unwrap(), 5);
        assert!(queue.is_empty());
        assert_eq!(rx.try_recv().unwrap().payload(), &[0x42]);
    }

    #[test]
    fn test_drain_propagates_queue_failure() {
        let mut endpoint = Endpoint::new(0x02, small()).unwrap();
        let queue = RxQueue::with_capacity(4);
        queue.producer().data_received(1).unwrap();
        queue.poison();

        let err = endpoint.drain(&queue).unwrap_err();
        assert!(matches!(
            err,
            HomebusError::Transceiver(TransceiverError::Internal(_))
        ));
        assert_eq!(endpoint.stats().bytes_received, 0);
    }

    #[test]
    fn test_sub_millisecond_idle_timeout_rounds_up() {
        let config = small().with_idle_timeout(Duration::from_micros(500));
        assert_eq!(config.idle_timeout_ms, Some(1));
        let mut endpoint = Endpoint::new(0x02, config).unwrap();

        endpoint.received_slice(&[1, 2]).unwrap();
        assert!(endpoint.check_idle(Instant::now() + Duration::from_millis(2)));

        let config = small().with_idle_timeout(Duration::from_micros(1500));
        assert_eq!(config.idle_timeout(), Some(Duration::from_millis(2)));

        let config = small().with_idle_timeout(Duration::ZERO);
        assert!(Endpoint::new(0x02, config).unwrap_err().is_bad_param());
    }

    #[test]
    fn test_check_idle_drops_stale_partial_frame() {
        let config = small().with_idle_timeout(Duration::from_millis(10));
        let mut endpoint = Endpoint::new(0x02, config).unwrap();

        endpoint.received_slice(&[1, 2, 3, 4, 0xAA]).unwrap();
        let now = Instant::now();
        assert!(!endpoint.check_idle(now));
        assert_eq!(endpoint.rx_state(), RxState::WaitForData);

        assert!(endpoint.check_idle(now + Duration::from_millis(20)));
        assert_eq!(endpoint.rx_state(), RxState::WaitForSelfAddr);
        assert_eq!(endpoint.stats().idle_resets, 1);

        // Idle endpoint: nothing to drop.
        assert!(!endpoint.check_idle(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_check_idle_without_timeout() {
        let mut endpoint = Endpoint::new(0x02, small()).unwrap();
        endpoint.received_slice(&[1, 2]).unwrap();
        assert!(!endpoint.check_idle(Instant::now() + Duration::from_secs(60)));
        assert_eq!(endpoint.rx_state(), RxState::WaitForOpCode);
    }

    #[test]
    fn test_stats_serialize() {
        let mut endpoint = Endpoint::new(0x02, small()).unwrap();
        endpoint.received_slice(&[1, 2, 3, 0]).unwrap();

        let json = serde_json::to_value(endpoint.stats()).unwrap();
        assert_eq!(json["bytes_received"], 4);
        assert_eq!(json["frames_unhandled"], 1);
    }
}
