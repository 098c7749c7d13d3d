//! Append-only rope of byte chunks.
//!
//! The decoder accumulates partial frames here, decoded payloads are
//! handed to streams as views into it, and the stream write path stages
//! outbound bytes in one before fragmenting. Chunks are [`bytes::Bytes`],
//! so [`ChunkList::sublist`] produces views that share the underlying
//! storage instead of copying, and those views stay valid after the
//! source list is [`consume`](ChunkList::consume)d.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

/// An append-only list of byte chunks with O(1) append, indexed byte
/// lookup, zero-copy range views and front consumption.
#[derive(Debug, Clone, Default)]
pub struct ChunkList {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl ChunkList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. The chunk is taken by reference count, never copied.
    pub fn append(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Total number of bytes across all chunks.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Random-access byte lookup. Returns `None` past the end.
    pub fn get(&self, index: usize) -> Option<u8> {
        let mut offset = index;
        for chunk in &self.chunks {
            if offset < chunk.len() {
                return Some(chunk[offset]);
            }
            offset -= chunk.len();
        }
        None
    }

    /// A view of the byte range `start..end` sharing the underlying
    /// chunks. The view remains valid even if `self` is consumed
    /// afterwards.
    pub fn sublist(&self, start: usize, end: usize) -> ChunkList {
        debug_assert!(start <= end && end <= self.len);
        let mut out = ChunkList::new();
        let mut pos = 0;
        for chunk in &self.chunks {
            let chunk_start = pos;
            let chunk_end = pos + chunk.len();
            pos = chunk_end;
            if chunk_end <= start {
                continue;
            }
            if chunk_start >= end {
                break;
            }
            let from = start.max(chunk_start) - chunk_start;
            let to = end.min(chunk_end) - chunk_start;
            out.append(chunk.slice(from..to));
        }
        out
    }

    /// Drop the first `n` bytes, discarding or trimming chunks as needed.
    pub fn consume(&mut self, n: usize) {
        let mut remaining = n.min(self.len);
        self.len -= remaining;
        while remaining > 0 {
            let front_len = match self.chunks.front() {
                Some(front) => front.len(),
                None => break,
            };
            if remaining >= front_len {
                self.chunks.pop_front();
                remaining -= front_len;
            } else {
                if let Some(front) = self.chunks.front_mut() {
                    front.advance(remaining);
                }
                remaining = 0;
            }
        }
    }

    /// Iterate over the chunks in order.
    pub fn chunks(&self) -> impl Iterator<Item = &Bytes> {
        self.chunks.iter()
    }

    /// Flatten into one contiguous `Bytes`. Zero-copy when the list holds
    /// a single chunk.
    pub fn concat(&self) -> Bytes {
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks[0].clone(),
            _ => {
                let mut buf = BytesMut::with_capacity(self.len);
                for chunk in &self.chunks {
                    buf.extend_from_slice(chunk);
                }
                buf.freeze()
            }
        }
    }
}

impl From<Bytes> for ChunkList {
    fn from(chunk: Bytes) -> Self {
        let mut list = ChunkList::new();
        list.append(chunk);
        list
    }
}

impl PartialEq for ChunkList {
    /// Content equality, not chunk-boundary equality.
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.concat() == other.concat()
    }
}

impl Eq for ChunkList {}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(parts: &[&[u8]]) -> ChunkList {
        let mut list = ChunkList::new();
        for part in parts {
            list.append(Bytes::copy_from_slice(part));
        }
        list
    }

    #[test]
    fn append_tracks_length() {
        let mut list = ChunkList::new();
        assert!(list.is_empty());

        list.append(Bytes::from_static(b"abc"));
        list.append(Bytes::from_static(b"de"));
        assert_eq!(list.len(), 5);

        // Empty chunks are not stored
        list.append(Bytes::new());
        assert_eq!(list.len(), 5);
        assert_eq!(list.chunks().count(), 2);
    }

    #[test]
    fn get_crosses_chunk_boundaries() {
        let list = list_of(&[b"ab", b"cd", b"e"]);
        assert_eq!(list.get(0), Some(b'a'));
        assert_eq!(list.get(1), Some(b'b'));
        assert_eq!(list.get(2), Some(b'c'));
        assert_eq!(list.get(4), Some(b'e'));
        assert_eq!(list.get(5), None);
    }

    #[test]
    fn sublist_shares_storage() {
        let chunk = Bytes::from_static(b"hello world");
        let mut list = ChunkList::new();
        list.append(chunk.clone());

        let view = list.sublist(0, 5);
        assert_eq!(view.concat(), &b"hello"[..]);
        // Same backing storage, no copy
        assert_eq!(view.concat().as_ptr(), chunk.as_ptr());
    }

    #[test]
    fn sublist_spans_chunks() {
        let list = list_of(&[b"ab", b"cd", b"ef"]);
        assert_eq!(list.sublist(1, 5).concat(), &b"bcde"[..]);
        assert_eq!(list.sublist(0, 6).concat(), &b"abcdef"[..]);
        assert_eq!(list.sublist(2, 2).len(), 0);
    }

    #[test]
    fn consume_trims_and_discards() {
        let mut list = list_of(&[b"ab", b"cd", b"ef"]);

        list.consume(3);
        assert_eq!(list.len(), 3);
        assert_eq!(list.concat(), &b"def"[..]);
        assert_eq!(list.get(0), Some(b'd'));

        list.consume(3);
        assert!(list.is_empty());
        assert_eq!(list.get(0), None);
    }

    #[test]
    fn consume_past_end_empties() {
        let mut list = list_of(&[b"abc"]);
        list.consume(100);
        assert!(list.is_empty());
    }

    #[test]
    fn sublist_survives_consume() {
        let mut list = list_of(&[b"abc", b"def"]);
        let view = list.sublist(1, 5);

        list.consume(6);
        assert!(list.is_empty());
        assert_eq!(view.concat(), &b"bcde"[..]);
    }

    #[test]
    fn concat_single_chunk_is_zero_copy() {
        let chunk = Bytes::from_static(b"payload");
        let list = ChunkList::from(chunk.clone());
        assert_eq!(list.concat().as_ptr(), chunk.as_ptr());
    }

    #[test]
    fn equality_ignores_chunk_boundaries() {
        let a = list_of(&[b"ab", b"cd"]);
        let b = list_of(&[b"a", b"bcd"]);
        let c = list_of(&[b"abce"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
