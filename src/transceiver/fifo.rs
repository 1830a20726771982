//! Receive buffer shared between the IO layer and the protocol stack.
//!
//! The IO layer pushes bytes from its receive interrupt through an
//! [`RxProducer`]; the main loop pulls them through an [`RxQueue`]. Both
//! are cheap handles onto the same bounded [`RxFifo`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::TransceiverError;

/// Bounded FIFO of received bytes.
#[derive(Debug, Clone)]
pub struct RxFifo {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl RxFifo {
    /// Create a FIFO holding at most `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one byte. Fails with `RxBufferFull` when at capacity.
    pub fn push(&mut self, byte: u8) -> Result<(), TransceiverError> {
        if self.is_full() {
            return Err(TransceiverError::RxBufferFull);
        }
        self.buf.push_back(byte);
        Ok(())
    }

    /// Remove the oldest byte. Fails with `RxBufferEmpty` when empty.
    pub fn pop(&mut self) -> Result<u8, TransceiverError> {
        self.buf.pop_front().ok_or(TransceiverError::RxBufferEmpty)
    }

    /// Look at the oldest byte without removing it.
    pub fn peek(&self) -> Option<u8> {
        self.buf.front().copied()
    }

    /// Move up to `out.len()` bytes into `out`, returning how many were read.
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len());
        for (slot, byte) in out.iter_mut().zip(self.buf.drain(..n)) {
            *slot = byte;
        }
        n
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn lock(fifo: &Mutex<RxFifo>) -> Result<MutexGuard<'_, RxFifo>, TransceiverError> {
    fifo.lock()
        .map_err(|_| TransceiverError::Internal("rx buffer lock poisoned".to_string()))
}

/// Producer side of the receive buffer, used by IO layers.
#[derive(Debug, Clone)]
pub struct RxProducer {
    fifo: Arc<Mutex<RxFifo>>,
}

impl RxProducer {
    /// Store one received byte.
    ///
    /// Fails with `RxBufferFull` if the main loop is not draining fast enough.
    pub fn data_received(&self, byte: u8) -> Result<(), TransceiverError> {
        lock(&self.fifo)?.push(byte)
    }
}

/// Consumer side of the receive buffer.
#[derive(Debug, Clone)]
pub struct RxQueue {
    fifo: Arc<Mutex<RxFifo>>,
}

impl RxQueue {
    /// Create an empty queue of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fifo: Arc::new(Mutex::new(RxFifo::with_capacity(capacity))),
        }
    }

    /// Producer handle onto the same buffer.
    pub fn producer(&self) -> RxProducer {
        RxProducer {
            fifo: self.fifo.clone(),
        }
    }

    /// Read one byte. Fails with `RxBufferEmpty` when nothing is buffered.
    pub fn read(&self) -> Result<u8, TransceiverError> {
        lock(&self.fifo)?.pop()
    }

    /// Move up to `out.len()` buffered bytes into `out`.
    pub fn read_into(&self, out: &mut [u8]) -> Result<usize, TransceiverError> {
        Ok(lock(&self.fifo)?.read_into(out))
    }

    /// True if at least one byte can be read.
    pub fn is_available(&self) -> bool {
        lock(&self.fifo).map(|f| !f.is_empty()).unwrap_or(false)
    }

    /// Discard buffered bytes.
    pub fn flush(&self) -> Result<(), TransceiverError> {
        lock(&self.fifo)?.clear();
        Ok(())
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        lock(&self.fifo).map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        lock(&self.fifo).map(|f| f.capacity()).unwrap_or(0)
    }
}

#[cfg(test)]
impl RxQueue {
    /// Leave the lock poisoned, as a producer panicking mid-push would.
    pub(crate) fn poison(&self) {
        let fifo = self.fifo.clone();
        let _ = std::thread::spawn(move || {
            let _guard = fifo.lock();
            panic!("producer panicked while holding the rx buffer");
        })
        .join();
    }
}
