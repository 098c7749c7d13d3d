//! Dedicated writer task serializing outbound frames onto the transport.
//!
//! Streams and the dispatch path hand [`Message`]s to this task over an
//! mpsc channel. The task owns the [`Encoder`] - and with it the header
//! pool - so all serialization happens on one task, and consecutive
//! frames are batched into vectored writes.
//!
//! ```text
//! Stream 1  ─┐
//! Stream 2  ─┼─► FrameSender ─► writer task ─► Encoder ─► transport
//! Dispatch  ─┘
//! ```

use std::io::IoSlice;

use bytes::{Buf, Bytes};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{MplexError, Result};
use crate::protocol::{Encoder, Message};

/// Capacity of the outbound frame queue. A full queue is the transport
/// backpressure that suspends stream writes.
const FRAME_QUEUE_CAPACITY: usize = 1024;

/// Maximum frames folded into a single vectored write.
const MAX_BATCH_SIZE: usize = 64;

/// Cheaply cloneable handle for queueing frames to the writer task.
#[derive(Clone)]
pub(crate) struct FrameSender {
    tx: mpsc::Sender<Message>,
}

impl FrameSender {
    /// Queue a frame, waiting for queue space.
    pub(crate) async fn send(&self, msg: Message) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| MplexError::ConnectionClosed)
    }

    /// Queue a frame without waiting. Fails when the queue is full or
    /// the writer is gone.
    pub(crate) fn try_send(&self, msg: Message) -> Result<()> {
        self.tx
            .try_send(msg)
            .map_err(|_| MplexError::ConnectionClosed)
    }
}

/// Spawn the writer task for one multiplexer.
///
/// The task ends when every [`FrameSender`] is dropped or `shutdown`
/// flips to true; frames still queued at shutdown are discarded.
pub(crate) fn spawn_writer_task<W>(
    writer: W,
    shutdown: watch::Receiver<bool>,
) -> (FrameSender, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
    let task = tokio::spawn(writer_loop(rx, writer, shutdown));
    (FrameSender { tx }, task)
}

/// Main writer loop: receive frames, encode, write in batches.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Message>,
    mut writer: W,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoder = Encoder::new();
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }
        let first = tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                // Every sender dropped: clean shutdown
                None => return Ok(()),
            },
            _ = shutdown.changed() => return Ok(()),
        };

        let mut chunks = encoder.write(&first);
        let mut batched = 1;
        while batched < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(msg) => {
                    chunks.extend(encoder.write(&msg));
                    batched += 1;
                }
                Err(_) => break,
            }
        }

        write_chunks(&mut writer, chunks).await?;
        writer.flush().await?;
    }
}

/// Write a list of chunks with scatter/gather I/O, continuing through
/// partial writes.
async fn write_chunks<W>(writer: &mut W, mut chunks: Vec<Bytes>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut start = 0;
    while start < chunks.len() {
        let slices: Vec<IoSlice<'_>> = chunks[start..]
            .iter()
            .map(|chunk| IoSlice::new(chunk))
            .collect();
        let mut written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )
            .into());
        }
        while written > 0 && start < chunks.len() {
            let front = &mut chunks[start];
            if front.len() <= written {
                written -= front.len();
                start += 1;
            } else {
                front.advance(written);
                written = 0;
            }
        }
    }
    Ok(())
}
