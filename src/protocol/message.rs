//! Frame records and wire type tags.

use crate::chunks::ChunkList;
use crate::error::MplexError;

/// Wire tag of an mplex frame.
///
/// The suffix encodes the sender's role for the stream: a peer receiving
/// a `*Initiator` tag knows the remote is acting as the stream's
/// initiator. `NewStream` is only ever sent by initiators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Open a new stream; payload is the UTF-8 stream name.
    NewStream = 0,
    /// Data fragment sent by the stream's receiver.
    MessageReceiver = 1,
    /// Data fragment sent by the stream's initiator.
    MessageInitiator = 2,
    /// Half-close by the stream's receiver.
    CloseReceiver = 3,
    /// Half-close by the stream's initiator.
    CloseInitiator = 4,
    /// Abnormal termination by the stream's receiver.
    ResetReceiver = 5,
    /// Abnormal termination by the stream's initiator.
    ResetInitiator = 6,
}

impl MessageType {
    /// Parse a wire tag. Anything outside 0..=6 is a fatal protocol
    /// violation.
    pub fn from_wire(raw: u8) -> Result<Self, MplexError> {
        match raw {
            0 => Ok(MessageType::NewStream),
            1 => Ok(MessageType::MessageReceiver),
            2 => Ok(MessageType::MessageInitiator),
            3 => Ok(MessageType::CloseReceiver),
            4 => Ok(MessageType::CloseInitiator),
            5 => Ok(MessageType::ResetReceiver),
            6 => Ok(MessageType::ResetInitiator),
            other => Err(MplexError::InvalidType(other)),
        }
    }

    /// Whether frames of this type carry a payload.
    pub fn is_data_bearing(self) -> bool {
        matches!(
            self,
            MessageType::NewStream | MessageType::MessageReceiver | MessageType::MessageInitiator
        )
    }

    /// Inbound routing: odd tags (`*Receiver`) were sent by the peer in
    /// its receiver role, so locally they address an initiator-owned
    /// stream.
    pub fn addresses_initiator(self) -> bool {
        (self as u8) & 1 == 1
    }
}

/// One mplex wire record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Logical stream id as chosen by the stream's initiator.
    pub id: u64,
    /// Frame kind.
    pub kind: MessageType,
    /// Payload; `Some` exactly for data-bearing kinds.
    pub data: Option<ChunkList>,
}

impl Message {
    /// A frame without payload.
    pub fn new(id: u64, kind: MessageType) -> Self {
        Self {
            id,
            kind,
            data: None,
        }
    }

    /// A data-bearing frame.
    pub fn with_data(id: u64, kind: MessageType, data: ChunkList) -> Self {
        debug_assert!(kind.is_data_bearing());
        Self {
            id,
            kind,
            data: Some(data),
        }
    }

    /// Payload length in bytes (zero for non-data frames).
    pub fn data_len(&self) -> usize {
        self.data.as_ref().map(ChunkList::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_wire_accepts_protocol_range() {
        for raw in 0..=6u8 {
            let kind = MessageType::from_wire(raw).unwrap();
            assert_eq!(kind as u8, raw);
        }
    }

    #[test]
    fn from_wire_rejects_out_of_range() {
        for raw in [7u8, 8, 0xff] {
            assert!(matches!(
                MessageType::from_wire(raw),
                Err(MplexError::InvalidType(r)) if r == raw
            ));
        }
    }

    #[test]
    fn data_bearing_tags() {
        assert!(MessageType::NewStream.is_data_bearing());
        assert!(MessageType::MessageReceiver.is_data_bearing());
        assert!(MessageType::MessageInitiator.is_data_bearing());
        assert!(!MessageType::CloseReceiver.is_data_bearing());
        assert!(!MessageType::CloseInitiator.is_data_bearing());
        assert!(!MessageType::ResetReceiver.is_data_bearing());
        assert!(!MessageType::ResetInitiator.is_data_bearing());
    }

    #[test]
    fn receiver_tags_address_local_initiators() {
        assert!(MessageType::MessageReceiver.addresses_initiator());
        assert!(MessageType::CloseReceiver.addresses_initiator());
        assert!(MessageType::ResetReceiver.addresses_initiator());
        assert!(!MessageType::MessageInitiator.addresses_initiator());
        assert!(!MessageType::CloseInitiator.addresses_initiator());
        assert!(!MessageType::ResetInitiator.addresses_initiator());
    }

    #[test]
    fn data_len() {
        use bytes::Bytes;

        let msg = Message::new(4, MessageType::CloseInitiator);
        assert_eq!(msg.data_len(), 0);

        let msg = Message::with_data(
            4,
            MessageType::MessageInitiator,
            ChunkList::from(Bytes::from_static(b"hello")),
        );
        assert_eq!(msg.data_len(), 5);
    }
}
