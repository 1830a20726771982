//! In-memory multi-drop bus.
//!
//! Stands in for the physical two-wire line when wiring several nodes
//! together in one process. Every byte written by one node is delivered to
//! the receive buffers of all other attached nodes, in attachment order.
//! A bounded transcript of line traffic is kept only when asked for.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{IoLayer, RxProducer, TransceiverError};

#[derive(Debug, Default)]
struct BusInner {
    /// Receive producers of attached nodes, keyed by node id.
    nodes: Vec<(usize, Option<RxProducer>)>,
    /// Most recent bytes written to the line, at most `transcript_limit`.
    transcript: VecDeque<u8>,
    transcript_limit: usize,
    bytes_written: u64,
    next_id: usize,
    fault: bool,
}

/// Shared line that [`BusIo`] IO layers attach to.
#[derive(Debug, Clone, Default)]
pub struct SharedBus {
    inner: Arc<Mutex<BusInner>>,
}

fn lock(inner: &Mutex<BusInner>) -> Result<MutexGuard<'_, BusInner>, TransceiverError> {
    inner
        .lock()
        .map_err(|_| TransceiverError::Internal("bus lock poisoned".to_string()))
}

impl SharedBus {
    /// Bus without a transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus that remembers the last `limit` bytes put on the line.
    pub fn with_transcript(limit: usize) -> Self {
        let bus = Self::default();
        if let Ok(mut inner) = lock(&bus.inner) {
            inner.transcript_limit = limit;
            inner.transcript.reserve(limit);
        }
        bus
    }

    /// Attach a new node. The returned IO layer is passed to
    /// [`Transceiver::init`](super::Transceiver::init).
    pub fn attach(&self) -> Result<BusIo, TransceiverError> {
        let mut inner = lock(&self.inner)?;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.nodes.push((id, None));
        drop(inner);

        Ok(BusIo {
            bus: self.clone(),
            id,
            tx_enabled: false,
        })
    }

    /// Recorded line traffic, oldest first. Empty unless the bus was built
    /// with [`SharedBus::with_transcript`].
    pub fn transcript(&self) -> Vec<u8> {
        lock(&self.inner)
            .map(|inner| inner.transcript.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Total bytes put on the line, recorded or not.
    pub fn bytes_written(&self) -> u64 {
        lock(&self.inner).map(|inner| inner.bytes_written).unwrap_or(0)
    }

    /// Number of attached nodes.
    pub fn node_count(&self) -> usize {
        lock(&self.inner).map(|inner| inner.nodes.len()).unwrap_or(0)
    }

    /// Make every subsequent write fail, as a shorted line would.
    pub fn set_fault(&self, fault: bool) {
        if let Ok(mut inner) = lock(&self.inner) {
            inner.fault = fault;
        }
    }
}

/// IO layer for one node on a [`SharedBus`].
#[derive(Debug)]
pub struct BusIo {
    bus: SharedBus,
    id: usize,
    tx_enabled: bool,
}

impl BusIo {
    /// Node id on the bus.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether this node currently drives the line.
    pub fn tx_enabled(&self) -> bool {
        self.tx_enabled
    }
}

impl IoLayer for BusIo {
    fn init(&mut self, rx: RxProducer) -> Result<(), TransceiverError> {
        let mut inner = lock(&self.bus.inner)?;
        let slot = inner
            .nodes
            .iter_mut()
            .find(|(id, _)| *id == self.id)
            .ok_or_else(|| TransceiverError::Internal(format!("node {} detached", self.id)))?;
        slot.1 = Some(rx);
        Ok(())
    }

    fn set_reset(&mut self, tx_enabled: bool) -> Result<(), TransceiverError> {
        self.tx_enabled = tx_enabled;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransceiverError> {
        let mut inner = lock(&self.bus.inner)?;
        if inner.fault {
            return Err(TransceiverError::UserFn("bus fault".to_string()));
        }

        inner.bytes_written += data.len() as u64;
        let limit = inner.transcript_limit;
        if limit > 0 {
            let keep = data.len().min(limit);
            let overflow = (inner.transcript.len() + keep).saturating_sub(limit);
            inner.transcript.drain(..overflow);
            inner.transcript.extend(&data[data.len() - keep..]);
        }

        // A receiver overrun is logged, the write itself still succeeds.
        for (id, rx) in &inner.nodes {
            if *id == self.id {
                continue;
            }
            let Some(rx) = rx else { continue };
            for &byte in data {
                if let Err(e) = rx.data_received(byte) {
                    tracing::warn!("Bus node {} dropped byte {:#04x}: {}", id, byte, e);
                }
            }
        }

        Ok(())
    }

    fn deinit(&mut self) -> Result<(), TransceiverError> {
        let mut inner = lock(&self.bus.inner)?;
        inner.nodes.retain(|(id, _)| *id != self.id);
        Ok(())
    }
}
