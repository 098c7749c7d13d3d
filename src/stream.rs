//! Per-stream state machine.
//!
//! A stream is a logical, ordered, bytewise duplex channel multiplexed
//! within a connection. [`MplexStream`] is the application-facing handle
//! with an async read/write surface; the owning multiplexer keeps the
//! matching [`StreamShared`] and drives the inbound half through a narrow
//! control surface (`source_push`, `close_read`, `reset`, `destroy`).
//!
//! Each half moves `OPEN -> ENDED` exactly once. When both halves have
//! ended, the stream removes itself from the owning registry.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::chunks::ChunkList;
use crate::error::{MplexError, Result};
use crate::muxer::MuxShared;
use crate::protocol::{Message, MessageType};
use crate::writer::FrameSender;

/// Which side of a stream this endpoint plays. The peer that sent
/// `NEW_STREAM` for an id is its initiator; the other side is its
/// receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// This endpoint opened the stream.
    Initiator,
    /// The remote opened the stream.
    Receiver,
}

impl Role {
    /// Outbound tag for data fragments.
    pub(crate) fn message_type(self) -> MessageType {
        match self {
            Role::Initiator => MessageType::MessageInitiator,
            Role::Receiver => MessageType::MessageReceiver,
        }
    }

    /// Outbound tag for half-close.
    pub(crate) fn close_type(self) -> MessageType {
        match self {
            Role::Initiator => MessageType::CloseInitiator,
            Role::Receiver => MessageType::CloseReceiver,
        }
    }

    /// Outbound tag for reset.
    pub(crate) fn reset_type(self) -> MessageType {
        match self {
            Role::Initiator => MessageType::ResetInitiator,
            Role::Receiver => MessageType::ResetReceiver,
        }
    }

    fn prefix(self) -> char {
        match self {
            Role::Initiator => 'i',
            Role::Receiver => 'r',
        }
    }
}

/// Stream identifier: the wire id plus the local role. The same numeric
/// id can denote two unrelated streams when both sides initiate with it,
/// so the pair is the unique key within one multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId {
    /// Wire id as chosen by the initiator.
    pub num: u64,
    /// Local role for this stream.
    pub role: Role,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.role.prefix(), self.num)
    }
}

/// Stream state shared between the application handle and the owning
/// multiplexer.
pub(crate) struct StreamShared {
    pub(crate) id: StreamId,
    pub(crate) name: String,
    open_time: Instant,
    close_time: Mutex<Option<Instant>>,
    source_ended: AtomicBool,
    sink_ended: AtomicBool,
    sink_started: AtomicBool,
    finished: AtomicBool,
    // Local one-shot cancellation latches, inspected in order
    // close -> reset -> abort when a send fails.
    close_requested: AtomicBool,
    reset_received: AtomicBool,
    abort_requested: AtomicBool,
    /// First fatal error wins; later ends keep it.
    end_error: Mutex<Option<MplexError>>,
    readable_bytes: AtomicUsize,
    /// Inbound data feed; dropping the sender is EOF for the reader.
    data_tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    frames: FrameSender,
    max_msg_size: usize,
    mux: Weak<MuxShared>,
}

impl StreamShared {
    // ------------------------------------------------------------------
    // Control surface used by the multiplexer
    // ------------------------------------------------------------------

    /// Feed inbound payload chunks to the reader.
    pub(crate) fn source_push(&self, data: &ChunkList) {
        let guard = self.data_tx.lock();
        let Some(tx) = guard.as_ref() else { return };
        for chunk in data.chunks() {
            self.readable_bytes.fetch_add(chunk.len(), Ordering::AcqRel);
            if tx.send(chunk.clone()).is_err() {
                self.readable_bytes.fetch_sub(chunk.len(), Ordering::AcqRel);
                return;
            }
        }
    }

    /// Bytes buffered on the readable side and not yet consumed.
    pub(crate) fn source_readable_len(&self) -> usize {
        self.readable_bytes.load(Ordering::Acquire)
    }

    /// End the readable half. Once only; buffered bytes stay readable.
    pub(crate) fn close_read(&self) {
        if self.source_ended.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.data_tx.lock() = None;
        self.maybe_finish();
    }

    /// The remote reset the stream: both halves end immediately with
    /// [`MplexError::StreamReset`]. No frame is sent back.
    pub(crate) fn reset(&self) {
        self.reset_received.store(true, Ordering::Release);
        self.destroy(Some(MplexError::StreamReset));
    }

    /// Force both halves closed, recording the first error.
    pub(crate) fn destroy(&self, err: Option<MplexError>) {
        if let Some(err) = err {
            let mut slot = self.end_error.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.source_ended.store(true, Ordering::Release);
        *self.data_tx.lock() = None;
        self.sink_ended.store(true, Ordering::Release);
        self.maybe_finish();
    }

    /// Start the writable half. Runs exactly once per stream; initiators
    /// announce themselves with `NEW_STREAM`.
    pub(crate) async fn start_sink(&self) -> Result<()> {
        if self.sink_started.swap(true, Ordering::AcqRel) {
            return Err(MplexError::DoubleSink);
        }
        if self.id.role == Role::Initiator {
            let name = ChunkList::from(Bytes::copy_from_slice(self.name.as_bytes()));
            self.send_frame(Message::with_data(self.id.num, MessageType::NewStream, name))
                .await?;
        }
        Ok(())
    }

    pub(crate) fn end_error(&self) -> Option<MplexError> {
        self.end_error.lock().clone()
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// End the writable half, telling the peer with `CLOSE_*`. Once only.
    pub(crate) async fn close_write(&self) -> Result<()> {
        if self.sink_ended.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self
            .send_frame(Message::new(self.id.num, self.id.role.close_type()))
            .await;
        self.maybe_finish();
        result
    }

    /// Send one frame, translating failures against the local
    /// cancellation latches.
    async fn send_frame(&self, msg: Message) -> Result<()> {
        if self.frames.send(msg).await.is_ok() {
            return Ok(());
        }
        if self.close_requested.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.reset_received.load(Ordering::Acquire) {
            return Err(MplexError::StreamReset);
        }
        if self.abort_requested.load(Ordering::Acquire) {
            return Err(MplexError::StreamAborted);
        }
        // Real failure: best-effort reset to the peer (its own failure is
        // swallowed), then end both halves with the error.
        let err = MplexError::ConnectionClosed;
        let _ = self
            .frames
            .try_send(Message::new(self.id.num, self.id.role.reset_type()));
        self.destroy(Some(err.clone()));
        Err(err)
    }

    fn maybe_finish(&self) {
        if !self.source_ended.load(Ordering::Acquire) || !self.sink_ended.load(Ordering::Acquire)
        {
            return;
        }
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.close_time.lock() = Some(Instant::now());
        if let Some(mux) = self.mux.upgrade() {
            mux.remove_stream(self.id);
        }
        tracing::debug!(stream = %self.id, "stream ended");
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Application handle for one multiplexed stream.
///
/// Reading and writing are independent: either direction can be closed
/// while the other keeps flowing (half-close).
pub struct MplexStream {
    shared: Arc<StreamShared>,
    data_rx: mpsc::UnboundedReceiver<Bytes>,
    /// Outbound staging area, drained in `max_msg_size` fragments.
    pending: ChunkList,
}

impl MplexStream {
    /// Stream identifier, unique within the owning multiplexer.
    pub fn id(&self) -> StreamId {
        self.shared.id
    }

    /// Stream name: the supplied one, or the decimal id.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Local role for this stream.
    pub fn role(&self) -> Role {
        self.shared.id.role
    }

    /// When the stream was created.
    pub fn open_time(&self) -> Instant {
        self.shared.open_time
    }

    /// When both halves had ended, if they have.
    pub fn close_time(&self) -> Option<Instant> {
        *self.shared.close_time.lock()
    }

    /// Whether both halves have ended.
    pub fn is_closed(&self) -> bool {
        self.shared.is_finished()
    }

    /// Read the next inbound chunk.
    ///
    /// `Ok(None)` signals a clean end of the readable half. After an
    /// abnormal end (remote reset, local abort, buffer overflow) the
    /// recorded error is returned and buffered data is discarded.
    pub async fn read(&mut self) -> Result<Option<Bytes>> {
        if let Some(err) = self.shared.end_error() {
            return Err(err);
        }
        match self.data_rx.recv().await {
            Some(chunk) => {
                if let Some(err) = self.shared.end_error() {
                    return Err(err);
                }
                self.shared
                    .readable_bytes
                    .fetch_sub(chunk.len(), Ordering::AcqRel);
                Ok(Some(chunk))
            }
            None => match self.shared.end_error() {
                Some(err) => Err(err),
                None => Ok(None),
            },
        }
    }

    /// Write bytes to the peer, fragmenting at the configured
    /// `max_msg_size`. Suspends only on transport backpressure.
    pub async fn write(&mut self, buf: &[u8]) -> Result<()> {
        if self.shared.sink_ended.load(Ordering::Acquire) {
            return Err(self.shared.end_error().unwrap_or(MplexError::SinkEnded));
        }
        self.pending.append(Bytes::copy_from_slice(buf));
        self.drain_pending().await
    }

    async fn drain_pending(&mut self) -> Result<()> {
        let max = self.shared.max_msg_size.max(1);
        while !self.pending.is_empty() {
            let take = self.pending.len().min(max);
            let fragment = self.pending.sublist(0, take);
            self.pending.consume(take);
            self.shared
                .send_frame(Message::with_data(
                    self.shared.id.num,
                    self.shared.id.role.message_type(),
                    fragment,
                ))
                .await?;
        }
        Ok(())
    }

    /// End the writable half after draining pending bytes. The peer sees
    /// `CLOSE_*`; the readable half stays usable.
    pub async fn end(&mut self) -> Result<()> {
        self.drain_pending().await?;
        self.shared.close_write().await
    }

    /// Half-close both directions locally.
    pub async fn close(&mut self) -> Result<()> {
        self.shared.close_requested.store(true, Ordering::Release);
        self.shared.close_read();
        self.shared.close_write().await
    }

    /// End the readable half only. Once only; the peer is not told.
    pub fn close_read(&mut self) {
        self.shared.close_read();
    }

    /// Local error path: the readable half ends quietly, the writable
    /// half ends with [`MplexError::StreamAborted`]. No frame is sent;
    /// the peer learns nothing until the transport goes away.
    pub fn abort(&mut self) {
        self.shared.abort_requested.store(true, Ordering::Release);
        self.shared.destroy(Some(MplexError::StreamAborted));
    }
}

impl Drop for MplexStream {
    fn drop(&mut self) {
        if self.shared.is_finished() {
            return;
        }
        // Abandoned handle: best-effort reset so the peer is not left
        // hanging, then local teardown.
        let _ = self.shared.frames.try_send(Message::new(
            self.shared.id.num,
            self.shared.id.role.reset_type(),
        ));
        self.shared.abort_requested.store(true, Ordering::Release);
        self.shared.destroy(Some(MplexError::StreamAborted));
    }
}

impl fmt::Debug for MplexStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MplexStream")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .finish()
    }
}

/// Create a stream and its shared state.
pub(crate) fn new_stream_pair(
    id: StreamId,
    name: String,
    frames: FrameSender,
    max_msg_size: usize,
    mux: Weak<MuxShared>,
) -> (MplexStream, Arc<StreamShared>) {
    let (data_tx, data_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(StreamShared {
        id,
        name,
        open_time: Instant::now(),
        close_time: Mutex::new(None),
        source_ended: AtomicBool::new(false),
        sink_ended: AtomicBool::new(false),
        sink_started: AtomicBool::new(false),
        finished: AtomicBool::new(false),
        close_requested: AtomicBool::new(false),
        reset_received: AtomicBool::new(false),
        abort_requested: AtomicBool::new(false),
        end_error: Mutex::new(None),
        readable_bytes: AtomicUsize::new(0),
        data_tx: Mutex::new(Some(data_tx)),
        frames,
        max_msg_size,
        mux,
    });
    let handle = MplexStream {
        shared: shared.clone(),
        data_rx,
        pending: ChunkList::new(),
    };
    (handle, shared)
}
