//! Dedicated writer task for putting frames on an async byte stream.
//!
//! Endpoints hand encoded frames to a [`WriterHandle`], which queues them on
//! an mpsc channel. A single task drains the channel, batches whatever is
//! ready and writes the batch with vectored I/O:
//!
//! ```text
//! Endpoint A ─┐
//! Endpoint B ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Stream
//! Handler    ─┘
//! ```
//!
//! [`WriterHandle`] implements [`TxSink`], so it can be registered directly
//! as an endpoint's transmit sink. That path never waits: a full queue is
//! reported as `QueueFull`.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{HomebusError, Result};
use crate::handler::TxSink;
use crate::protocol::{Header, Packet, HEADER_SIZE, MAX_DATA_LEN};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Encoded header.
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (may be empty).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a frame from a header and its payload.
    #[inline]
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Create a frame with an empty payload.
    #[inline]
    pub fn empty(header: &Header) -> Self {
        Self {
            header: header.encode(),
            payload: Bytes::new(),
        }
    }

    /// Encode a packet, checking its payload against `max_data_len`.
    pub fn from_packet(packet: &Packet, max_data_len: usize) -> Result<Self> {
        let header = packet.header(max_data_len)?;
        Ok(Self::new(&header, packet.data.clone()))
    }

    /// Split an already encoded frame into header and payload.
    ///
    /// Fails with `BadParam` if `frame` is shorter than its declared size.
    pub fn from_encoded(frame: &[u8]) -> Result<Self> {
        let header = Header::decode(frame).ok_or_else(|| {
            HomebusError::BadParam(format!("Frame of {} bytes has no header", frame.len()))
        })?;
        header.validate(MAX_DATA_LEN)?;
        if frame.len() != header.frame_size() {
            return Err(HomebusError::BadParam(format!(
                "Frame of {} bytes declares {}",
                frame.len(),
                header.frame_size()
            )));
        }
        Ok(Self::new(
            &header,
            Bytes::copy_from_slice(&frame[HEADER_SIZE..]),
        ))
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable; every endpoint sharing a stream gets its own clone.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    /// Frames queued but not yet written.
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    fn new(tx: mpsc::Sender<OutboundFrame>, pending: Arc<AtomicUsize>) -> Self {
        Self { tx, pending }
    }

    /// Queue a frame, waiting for channel capacity.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            HomebusError::ChannelClosed
        })
    }

    /// Queue a packet, waiting for channel capacity.
    pub async fn send_packet(&self, packet: &Packet) -> Result<()> {
        self.send(OutboundFrame::from_packet(packet, MAX_DATA_LEN)?)
            .await
    }

    /// Queue a frame without waiting.
    ///
    /// Returns `QueueFull` if the channel is at capacity and
    /// `ChannelClosed` if the writer task has stopped.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.try_send(frame).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => HomebusError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => HomebusError::ChannelClosed,
            }
        })
    }

    /// Current number of queued frames.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True once the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl TxSink for WriterHandle {
    fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        self.try_send(OutboundFrame::from_encoded(frame)?)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends with `Ok(())` once every handle is dropped, or with the
/// first I/O error.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(tx, pending.clone());
    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            None => {
                tracing::debug!("Writer channel closed, stopping");
                return Ok(());
            }
        };

        // Collect additional ready frames without waiting
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::error!("Writer failed after {} queued frames: {}", batch_size, e);
            return Err(e);
        }

        pending.fetch_sub(batch_size, Ordering::Release);
    }
}

/// Write a batch of frames with vectored I/O, continuing after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(HomebusError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data left after `skip_bytes` were written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let header_end = offset + HEADER_SIZE;
        if skip_bytes < header_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.header[start..]));
        }
        offset = header_end;

        if !frame.payload.is_empty() {
            let payload_end = offset + frame.payload.len();
            if skip_bytes < payload_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&frame.payload[start..]));
            }
            offset = payload_end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn test_outbound_frame_from_packet() {
        let packet = Packet::from_slice(0x10, 0x00, 42, b"hi");
        let frame = OutboundFrame::from_packet(&packet, 8).unwrap();

        assert_eq!(frame.header, [0x10, 0x00, 42, 2]);
        assert_eq!(frame.size(), HEADER_SIZE + 2);

        let too_long = Packet::from_slice(0x10, 0x00, 42, &[0u8; 9]);
        assert!(OutboundFrame::from_packet(&too_long, 8)
            .unwrap_err()
            .is_bad_param());
    }

    #[test]
    fn test_outbound_frame_from_encoded() {
        let frame = OutboundFrame::from_encoded(&[1, 2, 3, 2, 0xAA, 0xBB]).unwrap();
        assert_eq!(frame.header, [1, 2, 3, 2]);
        assert_eq!(&frame.payload[..], &[0xAA, 0xBB]);

        assert!(OutboundFrame::from_encoded(&[1, 2]).is_err());
        assert!(OutboundFrame::from_encoded(&[1, 2, 3, 5, 0]).is_err());
    }

    #[test]
    fn test_outbound_frame_empty() {
        let frame = OutboundFrame::empty(&Header::new(1, 2, 3, 0));
        assert!(frame.payload.is_empty());
        assert_eq!(frame.size(), HEADER_SIZE);
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task_default(client);

        handle
            .send_packet(&Packet::from_slice(1, 2, 42, b"hello"))
            .await
            .unwrap();

        let mut buf = vec![0u8; HEADER_SIZE + 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..HEADER_SIZE], &[1, 2, 42, 5]);
        assert_eq!(&buf[HEADER_SIZE..], b"hello");
    }

    #[tokio::test]
    async fn test_writer_batching() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task_default(client);

        for i in 0..10u8 {
            let frame = OutboundFrame::new(&Header::new(1, 2, i, 1), Bytes::copy_from_slice(&[i]));
            handle.send(frame).await.unwrap();
        }

        let mut buf = vec![0u8; 10 * (HEADER_SIZE + 1)];
        server.read_exact(&mut buf).await.unwrap();

        for (i, chunk) in buf.chunks(HEADER_SIZE + 1).enumerate() {
            assert_eq!(chunk, &[1, 2, i as u8, 1, i as u8]);
        }
    }

    #[tokio::test]
    async fn test_tx_sink_try_send_full() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(1);
        let mut handle = WriterHandle::new(tx, Arc::new(AtomicUsize::new(0)));

        TxSink::transmit(&mut handle, &[1, 2, 3, 0]).unwrap();
        let err = TxSink::transmit(&mut handle, &[1, 2, 3, 0]).unwrap_err();
        assert!(matches!(err, HomebusError::QueueFull));
        assert_eq!(handle.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_tx_sink_closed() {
        let (tx, rx) = mpsc::channel::<OutboundFrame>(1);
        drop(rx);
        let mut handle = WriterHandle::new(tx, Arc::new(AtomicUsize::new(0)));

        let err = TxSink::transmit(&mut handle, &[1, 2, 3, 0]).unwrap_err();
        assert!(matches!(err, HomebusError::ChannelClosed));
        assert!(handle.is_closed());
        assert_eq!(handle.pending_count(), 0);
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![OutboundFrame::new(
            &Header::new(1, 2, 3, 5),
            Bytes::from_static(b"hello"),
        )];

        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_build_remaining_slices_partial_header() {
        let batch = vec![OutboundFrame::new(
            &Header::new(1, 2, 3, 5),
            Bytes::from_static(b"hello"),
        )];

        let slices = build_remaining_slices(&batch, 3);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 3);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_build_remaining_slices_second_frame() {
        let batch = vec![
            OutboundFrame::new(&Header::new(1, 2, 3, 2), Bytes::from_static(b"ab")),
            OutboundFrame::empty(&Header::new(4, 5, 6, 0)),
        ];

        let slices = build_remaining_slices(&batch, HEADER_SIZE + 2 + 1);
        assert_eq!(slices.len(), 1);
        assert_eq!(&*slices[0], &[5, 6, 0]);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());

        let batch: Vec<_> = (0..5)
            .map(|i| OutboundFrame::new(&Header::new(1, 2, i, 3), Bytes::from_static(b"abc")))
            .collect();

        write_batch(&mut buf, &batch).await.unwrap();
        assert_eq!(buf.into_inner().len(), 5 * (HEADER_SIZE + 3));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task_default(client);

        drop(handle);

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
