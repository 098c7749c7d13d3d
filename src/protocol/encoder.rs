//! Frame encoder with a pooled header buffer.
//!
//! Header varints are written into a shared `BytesMut` block and split
//! off as zero-copy views, so steady-state encoding allocates one block
//! per ~10 KiB of headers instead of one buffer per frame. Payload
//! chunks pass through by reference count and are never copied.

use bytes::{Bytes, BytesMut};

use super::message::Message;
use super::varint::write_varint;

/// Size of each pooled header block.
const WRITE_POOL_CAPACITY: usize = 10 * 1024;

/// A fresh block is allocated once fewer bytes than this remain. Headers
/// are at most two 10-byte varints; correctness never depends on the
/// pool geometry, only allocation frequency does.
const WRITE_POOL_MIN_REMAINING: usize = 100;

/// Serializes [`Message`]s into wire chunks.
pub struct Encoder {
    pool: BytesMut,
}

impl Encoder {
    /// Create an encoder with a fresh header pool.
    pub fn new() -> Self {
        Self {
            pool: BytesMut::with_capacity(WRITE_POOL_CAPACITY),
        }
    }

    /// Serialize one message into an ordered list of byte chunks whose
    /// concatenation is the wire encoding.
    pub fn write(&mut self, msg: &Message) -> Vec<Bytes> {
        if self.pool.capacity() < WRITE_POOL_MIN_REMAINING {
            self.pool = BytesMut::with_capacity(WRITE_POOL_CAPACITY);
        }

        write_varint(&mut self.pool, msg.id << 3 | msg.kind as u64);
        write_varint(&mut self.pool, msg.data_len() as u64);
        let header = self.pool.split().freeze();

        let mut chunks = Vec::with_capacity(2);
        chunks.push(header);
        if msg.kind.is_data_bearing() {
            if let Some(data) = &msg.data {
                chunks.extend(data.chunks().cloned());
            }
        }
        chunks
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}
