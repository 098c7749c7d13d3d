//! Unsigned LEB128 varints over chunk lists.
//!
//! Values are written 7 bits per byte, least-significant group first,
//! with the high bit marking continuation. Decoding reads straight out
//! of a [`ChunkList`] so the frame decoder never has to flatten its
//! accumulator.

use bytes::{BufMut, BytesMut};

use crate::chunks::ChunkList;

/// Longest accepted encoding: 10 bytes covers the full `u64` range.
pub(crate) const MAX_VARINT_LEN: usize = 10;

/// Why a varint could not be decoded. Both flavors are internal signals:
/// the frame decoder responds to either by waiting for more input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VarintError {
    /// The input ran out before a terminating byte.
    Truncated,
    /// No terminating byte within [`MAX_VARINT_LEN`] bytes.
    TooLong,
}

/// Append the LEB128 encoding of `value` to `buf`.
pub(crate) fn write_varint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

/// Decode a varint from `src` starting at `offset`.
///
/// Returns the value and the number of bytes consumed.
pub(crate) fn read_varint(src: &ChunkList, offset: usize) -> Result<(u64, usize), VarintError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for i in 0..MAX_VARINT_LEN {
        let byte = src.get(offset + i).ok_or(VarintError::Truncated)?;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    Err(VarintError::TooLong)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn encode(value: u64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, value);
        buf.to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<(u64, usize), VarintError> {
        let list = ChunkList::from(Bytes::copy_from_slice(bytes));
        read_varint(&list, 0)
    }

    #[test]
    fn single_byte_values() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(1), vec![0x01]);
        assert_eq!(encode(127), vec![0x7f]);
    }

    #[test]
    fn multi_byte_values() {
        assert_eq!(encode(128), vec![0x80, 0x01]);
        assert_eq!(encode(300), vec![0xac, 0x02]);
        // Header word for stream id 17, type 0
        assert_eq!(encode(136), vec![0x88, 0x01]);
    }

    #[test]
    fn roundtrip() {
        for value in [
            0u64,
            1,
            127,
            128,
            300,
            16_384,
            u64::from(u32::MAX),
            1 << 40,
            u64::MAX,
        ] {
            let bytes = encode(value);
            let (decoded, consumed) = decode(&bytes).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, bytes.len());
        }
    }

    #[test]
    fn roundtrip_across_chunk_boundary() {
        let bytes = encode(u64::MAX);
        let mut list = ChunkList::new();
        for byte in &bytes {
            list.append(Bytes::copy_from_slice(&[*byte]));
        }
        let (decoded, consumed) = read_varint(&list, 0).unwrap();
        assert_eq!(decoded, u64::MAX);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn decode_at_offset() {
        let mut list = ChunkList::from(Bytes::from_static(&[0x88, 0x01, 0x02]));
        let (value, consumed) = read_varint(&list, 0).unwrap();
        assert_eq!((value, consumed), (136, 2));
        let (value, consumed) = read_varint(&list, 2).unwrap();
        assert_eq!((value, consumed), (2, 1));

        list.consume(2);
        let (value, consumed) = read_varint(&list, 0).unwrap();
        assert_eq!((value, consumed), (2, 1));
    }

    #[test]
    fn truncated_input() {
        assert_eq!(decode(&[]), Err(VarintError::Truncated));
        assert_eq!(decode(&[0x80]), Err(VarintError::Truncated));
        assert_eq!(decode(&[0xff, 0xff]), Err(VarintError::Truncated));
    }

    #[test]
    fn ten_byte_ceiling() {
        // Ten continuation bytes and no terminator
        assert_eq!(decode(&[0x80; 10]), Err(VarintError::TooLong));
        assert_eq!(decode(&[0xff; 12]), Err(VarintError::TooLong));
    }
}
