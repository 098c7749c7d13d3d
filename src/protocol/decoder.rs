//! Stateful frame decoder.
//!
//! Accepts arbitrary byte chunks and emits every complete frame they
//! finish. Partial input is accumulated in a [`ChunkList`]; payloads are
//! handed out as zero-copy views into it. A header whose varints are
//! still incomplete simply waits for more bytes; an out-of-range type
//! tag is a permanent failure.

use bytes::Bytes;

use crate::chunks::ChunkList;
use crate::error::Result;
use super::message::{Message, MessageType};
use super::varint::read_varint;

/// A parsed header whose payload has not fully arrived yet.
#[derive(Debug, Clone, Copy)]
struct PendingHeader {
    id: u64,
    kind: MessageType,
    /// First payload byte, relative to the accumulator start.
    payload_offset: usize,
    payload_len: usize,
}

/// Incremental decoder for the mplex wire format.
#[derive(Default)]
pub struct Decoder {
    acc: ChunkList,
    pending: Option<PendingHeader>,
}

impl Decoder {
    /// Create a decoder with an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and extract all complete frames.
    ///
    /// May return zero messages (still waiting for bytes) or many. Frames
    /// are returned in wire order. An invalid type tag fails permanently.
    pub fn write(&mut self, chunk: Bytes) -> Result<Vec<Message>> {
        self.acc.append(chunk);

        let mut messages = Vec::new();
        loop {
            let header = match self.pending {
                Some(header) => header,
                None => match self.try_read_header()? {
                    Some(header) => {
                        self.pending = Some(header);
                        header
                    }
                    None => break,
                },
            };

            if self.acc.len() - header.payload_offset < header.payload_len {
                break;
            }

            let data = header.kind.is_data_bearing().then(|| {
                self.acc.sublist(
                    header.payload_offset,
                    header.payload_offset + header.payload_len,
                )
            });
            self.acc.consume(header.payload_offset + header.payload_len);
            self.pending = None;
            messages.push(Message {
                id: header.id,
                kind: header.kind,
                data,
            });
        }
        Ok(messages)
    }

    /// Decode the two header varints at the accumulator start.
    /// `Ok(None)` means the input is still too short.
    fn try_read_header(&self) -> Result<Option<PendingHeader>> {
        let (word, word_len) = match read_varint(&self.acc, 0) {
            Ok(decoded) => decoded,
            Err(_) => return Ok(None),
        };
        let (payload_len, len_len) = match read_varint(&self.acc, word_len) {
            Ok(decoded) => decoded,
            Err(_) => return Ok(None),
        };
        let kind = MessageType::from_wire((word & 0x07) as u8)?;
        Ok(Some(PendingHeader {
            id: word >> 3,
            kind,
            payload_offset: word_len + len_len,
            payload_len: payload_len as usize,
        }))
    }

    /// Bytes buffered while waiting for a complete frame.
    pub fn buffered_len(&self) -> usize {
        self.acc.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MplexError;

    const THREE_NEW_STREAMS: &[u8] = &[
        0x88, 0x01, 0x02, 0x31, 0x37, 0x98, 0x01, 0x02, 0x31, 0x39, 0xa8, 0x01, 0x02, 0x32, 0x31,
    ];

    fn new_stream(id: u64, name: &str) -> Message {
        Message::with_data(
            id,
            MessageType::NewStream,
            ChunkList::from(Bytes::copy_from_slice(name.as_bytes())),
        )
    }

    #[test]
    fn single_frame() {
        let mut decoder = Decoder::new();
        let messages = decoder
            .write(Bytes::from_static(&[0x88, 0x01, 0x02, 0x31, 0x37]))
            .unwrap();
        assert_eq!(messages, vec![new_stream(17, "17")]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn zero_length_data() {
        let mut decoder = Decoder::new();
        let messages = decoder
            .write(Bytes::from_static(&[0x88, 0x01, 0x00]))
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, 17);
        assert_eq!(messages[0].kind, MessageType::NewStream);
        assert_eq!(messages[0].data.as_ref().map(ChunkList::len), Some(0));
    }

    #[test]
    fn multiple_frames_in_one_write() {
        let mut decoder = Decoder::new();
        let messages = decoder.write(Bytes::from_static(THREE_NEW_STREAMS)).unwrap();
        assert_eq!(
            messages,
            vec![new_stream(17, "17"), new_stream(19, "19"), new_stream(21, "21")]
        );
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn any_partition_yields_the_same_frames() {
        // Split the three-frame sequence at every position
        for split in 0..=THREE_NEW_STREAMS.len() {
            let mut decoder = Decoder::new();
            let mut messages = decoder
                .write(Bytes::copy_from_slice(&THREE_NEW_STREAMS[..split]))
                .unwrap();
            messages.extend(
                decoder
                    .write(Bytes::copy_from_slice(&THREE_NEW_STREAMS[split..]))
                    .unwrap(),
            );
            assert_eq!(messages.len(), 3, "split at {split}");
            assert_eq!(messages[2], new_stream(21, "21"));
        }
    }

    #[test]
    fn byte_at_a_time() {
        let mut decoder = Decoder::new();
        let mut messages = Vec::new();
        for byte in THREE_NEW_STREAMS {
            messages.extend(decoder.write(Bytes::copy_from_slice(&[*byte])).unwrap());
        }
        assert_eq!(
            messages,
            vec![new_stream(17, "17"), new_stream(19, "19"), new_stream(21, "21")]
        );
    }

    #[test]
    fn partial_payload_is_buffered() {
        let mut decoder = Decoder::new();
        assert!(decoder
            .write(Bytes::from_static(&[0x88, 0x01, 0x02, 0x31]))
            .unwrap()
            .is_empty());
        assert_eq!(decoder.buffered_len(), 4);

        let messages = decoder.write(Bytes::from_static(&[0x37])).unwrap();
        assert_eq!(messages, vec![new_stream(17, "17")]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn unknown_type_is_fatal() {
        // header word = 17 << 3 | 7
        let mut decoder = Decoder::new();
        let result = decoder.write(Bytes::from_static(&[0x8f, 0x01, 0x00]));
        assert!(matches!(result, Err(MplexError::InvalidType(7))));
    }

    #[test]
    fn non_data_frame_payload_is_skipped() {
        // CLOSE_INITIATOR carrying stray payload bytes: consumed, not exposed
        let mut decoder = Decoder::new();
        let messages = decoder
            .write(Bytes::from_static(&[0x8c, 0x01, 0x02, 0xaa, 0xbb, 0x8c, 0x01, 0x00]))
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.data.is_none()));
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn payload_shares_input_storage() {
        let mut decoder = Decoder::new();
        assert!(decoder.write(Bytes::from_static(&[0x88, 0x01, 0x02])).unwrap().is_empty());

        let payload = Bytes::from_static(&[0x31, 0x37]);
        let messages = decoder.write(payload.clone()).unwrap();
        let data = messages[0].data.as_ref().unwrap().concat();
        assert_eq!(data.as_ptr(), payload.as_ptr());
    }

    #[test]
    fn large_id_roundtrip() {
        // ids beyond 2^28 exercise the upper varint range
        let id: u64 = 1 << 40;
        let mut encoder = crate::protocol::Encoder::new();
        let chunks = encoder.write(&Message::new(id, MessageType::ResetInitiator));

        let mut decoder = Decoder::new();
        let mut messages = Vec::new();
        for chunk in chunks {
            messages.extend(decoder.write(chunk).unwrap());
        }
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, id);
        assert_eq!(messages[0].kind, MessageType::ResetInitiator);
    }
}
