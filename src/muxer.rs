//! Connection-level multiplexer.
//!
//! The [`Multiplexer`] sits on one reliable duplex byte transport. It
//! owns two stream registries (locally-initiated and remotely-initiated),
//! decodes inbound bytes into frames and dispatches them, opens outbound
//! streams, and applies the inbound-stream DoS policy: a hard cap plus a
//! token-bucket limiter for `NEW_STREAM` bursts beyond it.
//!
//! Lifecycle:
//! 1. `Multiplexer::new` splits the transport and spawns the inbound
//!    loop and the writer task.
//! 2. `open_stream` / `accept` hand out [`MplexStream`]s.
//! 3. A protocol violation, transport failure or `close()` destroys
//!    every live stream and latches the multiplexer closed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, watch};

use crate::config::MplexConfig;
use crate::error::{MplexError, Result};
use crate::protocol::{Decoder, Message, MessageType};
use crate::rate_limit::TokenBucket;
use crate::stream::{new_stream_pair, MplexStream, Role, StreamId, StreamShared};
use crate::writer::{spawn_writer_task, FrameSender};

/// Read buffer for the inbound loop.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Snapshot entry for a registered stream.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Stream identifier.
    pub id: StreamId,
    /// Stream name.
    pub name: String,
}

/// The two disjoint stream maps plus the outbound id counter.
#[derive(Default)]
struct Registry {
    initiators: HashMap<u64, Arc<StreamShared>>,
    receivers: HashMap<u64, Arc<StreamShared>>,
    next_stream_id: u64,
}

/// Multiplexer state shared between the public handle, the inbound loop
/// and every stream.
pub(crate) struct MuxShared {
    config: MplexConfig,
    registry: Mutex<Registry>,
    closed: AtomicBool,
    close_reason: Mutex<Option<MplexError>>,
    frames: FrameSender,
    /// Queue feeding `accept`; dropped on close so acceptors see the end.
    incoming_tx: Mutex<Option<mpsc::UnboundedSender<MplexStream>>>,
    new_stream_limiter: Mutex<TokenBucket>,
    closed_tx: watch::Sender<bool>,
}

impl MuxShared {
    pub(crate) async fn open_stream(self: &Arc<Self>, name: Option<&str>) -> Result<MplexStream> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MplexError::MuxerClosed);
        }
        let id = {
            let mut registry = self.registry.lock();
            if registry.initiators.len() >= self.config.max_outbound_streams {
                return Err(MplexError::TooManyOutboundStreams);
            }
            let num = registry.next_stream_id;
            registry.next_stream_id += 1;
            StreamId {
                num,
                role: Role::Initiator,
            }
        };
        let name = name
            .map(str::to_owned)
            .unwrap_or_else(|| id.num.to_string());
        let (handle, shared) = new_stream_pair(
            id,
            name,
            self.frames.clone(),
            self.config.max_msg_size,
            Arc::downgrade(self),
        );
        self.registry.lock().initiators.insert(id.num, shared.clone());
        shared.start_sink().await?;
        Ok(handle)
    }

    /// Destroy every live stream and latch closed. Idempotent; frames
    /// still queued for the transport are discarded.
    pub(crate) fn close(&self, reason: Option<MplexError>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(err) = &reason {
            *self.close_reason.lock() = Some(err.clone());
        }
        let streams: Vec<Arc<StreamShared>> = {
            let mut guard = self.registry.lock();
            let registry = &mut *guard;
            registry
                .initiators
                .drain()
                .map(|(_, stream)| stream)
                .chain(registry.receivers.drain().map(|(_, stream)| stream))
                .collect()
        };
        for stream in streams {
            stream.destroy(reason.clone());
        }
        *self.incoming_tx.lock() = None;
        let _ = self.closed_tx.send(true);
        tracing::debug!("multiplexer closed");
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close_reason(&self) -> Option<MplexError> {
        self.close_reason.lock().clone()
    }

    /// Drop a fully-ended stream from its registry.
    pub(crate) fn remove_stream(&self, id: StreamId) {
        let mut registry = self.registry.lock();
        match id.role {
            Role::Initiator => registry.initiators.remove(&id.num),
            Role::Receiver => registry.receivers.remove(&id.num),
        };
    }

    pub(crate) fn streams(&self) -> Vec<StreamInfo> {
        let registry = self.registry.lock();
        registry
            .initiators
            .values()
            .chain(registry.receivers.values())
            .map(|stream| StreamInfo {
                id: stream.id,
                name: stream.name.clone(),
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    async fn dispatch(self: &Arc<Self>, msg: Message) -> Result<()> {
        match msg.kind {
            MessageType::NewStream => self.handle_new_stream(msg).await,
            MessageType::MessageInitiator | MessageType::MessageReceiver => {
                self.handle_data(msg).await
            }
            MessageType::CloseInitiator | MessageType::CloseReceiver => {
                if let Some(stream) = self.lookup(&msg) {
                    stream.close_read();
                }
                Ok(())
            }
            MessageType::ResetInitiator | MessageType::ResetReceiver => {
                if let Some(stream) = self.lookup(&msg) {
                    stream.reset();
                }
                Ok(())
            }
        }
    }

    /// Route a non-`NEW_STREAM` frame: odd tags were sent by the peer in
    /// its receiver role, so they address our initiators, and vice versa.
    fn lookup(&self, msg: &Message) -> Option<Arc<StreamShared>> {
        let registry = self.registry.lock();
        let found = if msg.kind.addresses_initiator() {
            registry.initiators.get(&msg.id).cloned()
        } else {
            registry.receivers.get(&msg.id).cloned()
        };
        if found.is_none() {
            tracing::debug!(id = msg.id, kind = ?msg.kind, "frame for unknown stream, dropping");
        }
        found
    }

    async fn handle_new_stream(self: &Arc<Self>, msg: Message) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let at_capacity =
            { self.registry.lock().receivers.len() >= self.config.max_inbound_streams };
        if at_capacity {
            tracing::warn!(id = msg.id, "inbound stream cap reached, resetting");
            let _ = self
                .frames
                .send(Message::new(msg.id, MessageType::ResetReceiver))
                .await;
            if !self.new_stream_limiter.lock().try_take() {
                return Err(MplexError::TooManyOpenStreams);
            }
            return Ok(());
        }

        let name = match &msg.data {
            Some(data) => String::from_utf8_lossy(&data.concat()).into_owned(),
            None => String::new(),
        };
        let id = StreamId {
            num: msg.id,
            role: Role::Receiver,
        };
        let (handle, shared) = new_stream_pair(
            id,
            name,
            self.frames.clone(),
            self.config.max_msg_size,
            Arc::downgrade(self),
        );
        shared.start_sink().await?;
        self.registry.lock().receivers.insert(msg.id, shared);
        let delivered = {
            let guard = self.incoming_tx.lock();
            match guard.as_ref() {
                Some(tx) => tx.send(handle).is_ok(),
                None => {
                    drop(handle);
                    false
                }
            }
        };
        if !delivered {
            // Nobody will ever accept it; dropping the handle resets it
            tracing::debug!(id = msg.id, "incoming stream dropped, acceptor gone");
        }
        Ok(())
    }

    async fn handle_data(&self, msg: Message) -> Result<()> {
        let Some(stream) = self.lookup(&msg) else {
            return Ok(());
        };
        if stream.source_readable_len() > self.config.max_stream_buffer_size {
            let reset = if msg.kind == MessageType::MessageInitiator {
                MessageType::ResetReceiver
            } else {
                MessageType::ResetInitiator
            };
            tracing::warn!(stream = %stream.id, "inbound buffer overflow, resetting stream");
            let _ = self.frames.send(Message::new(msg.id, reset)).await;
            stream.destroy(Some(MplexError::InputBufferFull));
            return Ok(());
        }
        if let Some(data) = msg.data {
            stream.source_push(&data);
        }
        Ok(())
    }
}

/// Inbound loop: read transport bytes, decode, dispatch in order. Each
/// decoded batch is fully dispatched before the next read.
async fn inbound_loop<R>(mut reader: R, mux: Arc<MuxShared>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = Decoder::new();
    let mut closed = mux.closed_tx.subscribe();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        if mux.is_closed() {
            return Ok(());
        }
        let n = tokio::select! {
            result = reader.read(&mut buf) => result?,
            _ = closed.changed() => return Ok(()),
        };
        if n == 0 {
            return Ok(());
        }
        let messages = decoder.write(Bytes::copy_from_slice(&buf[..n]))?;
        for msg in messages {
            mux.dispatch(msg).await?;
        }
    }
}

/// A duplex mplex endpoint on one transport connection.
pub struct Multiplexer {
    shared: Arc<MuxShared>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MplexStream>>,
    closed_rx: watch::Receiver<bool>,
}

impl Multiplexer {
    /// Take ownership of a transport and start multiplexing on it.
    pub fn new<T>(transport: T, config: MplexConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(transport);
        let (closed_tx, closed_rx) = watch::channel(false);
        let (frames, writer_task) = spawn_writer_task(write_half, closed_tx.subscribe());
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(MuxShared {
            new_stream_limiter: Mutex::new(TokenBucket::new(config.disconnect_threshold)),
            config,
            registry: Mutex::new(Registry::default()),
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            frames,
            incoming_tx: Mutex::new(Some(incoming_tx)),
            closed_tx,
        });

        let mux = shared.clone();
        tokio::spawn(async move {
            match inbound_loop(read_half, mux.clone()).await {
                Ok(()) => mux.close(None),
                Err(err) => {
                    tracing::error!(error = %err, "inbound loop failed");
                    mux.close(Some(err));
                }
            }
        });

        let mux = shared.clone();
        tokio::spawn(async move {
            match writer_task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "writer task failed");
                    mux.close(Some(err));
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "writer task panicked");
                    mux.close(Some(MplexError::ConnectionClosed));
                }
            }
        });

        Multiplexer {
            shared,
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
            closed_rx,
        }
    }

    /// Open an outbound stream, optionally named. The peer sees a
    /// `NEW_STREAM` frame immediately.
    pub async fn open_stream(&self, name: Option<&str>) -> Result<MplexStream> {
        self.shared.open_stream(name).await
    }

    /// Wait for the next stream opened by the peer. `None` once the
    /// multiplexer is closed.
    pub async fn accept(&self) -> Option<MplexStream> {
        self.incoming_rx.lock().await.recv().await
    }

    /// Snapshot of every currently-registered stream, both directions.
    pub fn streams(&self) -> Vec<StreamInfo> {
        self.shared.streams()
    }

    /// Whether the multiplexer has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Why the multiplexer closed, when it closed on an error.
    pub fn close_reason(&self) -> Option<MplexError> {
        self.shared.close_reason()
    }

    /// Destroy every live stream and latch closed. Pending outbound
    /// bytes are discarded. No-op when already closed.
    pub fn close(&self) {
        self.shared.close(None);
    }

    /// Wait until the multiplexer is closed, locally or by failure.
    pub async fn wait_closed(&self) {
        let mut closed = self.closed_rx.clone();
        while !*closed.borrow() {
            if closed.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.shared.close(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn muxer(config: MplexConfig) -> (Multiplexer, tokio::io::DuplexStream) {
        let (left, right) = tokio::io::duplex(64 * 1024);
        (Multiplexer::new(left, config), right)
    }

    #[tokio::test]
    async fn open_stream_assigns_sequential_ids() {
        let (mux, _wire) = muxer(MplexConfig::default());

        let first = mux.open_stream(None).await.unwrap();
        let second = mux.open_stream(Some("named")).await.unwrap();

        assert_eq!(first.id().num, 0);
        assert_eq!(first.name(), "0");
        assert_eq!(second.id().num, 1);
        assert_eq!(second.name(), "named");
        assert_eq!(second.role(), Role::Initiator);
        assert_eq!(mux.streams().len(), 2);
    }

    #[tokio::test]
    async fn outbound_cap_is_enforced() {
        let (mux, _wire) = muxer(MplexConfig::new().max_outbound_streams(1));

        let _held = mux.open_stream(None).await.unwrap();
        assert!(matches!(
            mux.open_stream(None).await,
            Err(MplexError::TooManyOutboundStreams)
        ));
    }

    #[tokio::test]
    async fn open_after_close_is_rejected() {
        let (mux, _wire) = muxer(MplexConfig::default());
        mux.close();

        assert!(mux.is_closed());
        assert!(mux.close_reason().is_none());
        assert!(matches!(
            mux.open_stream(None).await,
            Err(MplexError::MuxerClosed)
        ));
    }

    #[tokio::test]
    async fn close_destroys_registered_streams() {
        let (mux, _wire) = muxer(MplexConfig::default());

        let mut stream = mux.open_stream(None).await.unwrap();
        assert_eq!(mux.streams().len(), 1);

        mux.close();
        assert!(mux.streams().is_empty());
        // Quiet teardown: readers see EOF, not an error
        assert!(matches!(stream.read().await, Ok(None)));
        assert!(stream.is_closed());
        mux.wait_closed().await;
    }

    #[tokio::test]
    async fn accept_ends_after_close() {
        let (mux, _wire) = muxer(MplexConfig::default());
        mux.close();
        assert!(mux.accept().await.is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (mux, _wire) = muxer(MplexConfig::default());
        mux.close();
        mux.close();
        assert!(mux.is_closed());
    }
}
