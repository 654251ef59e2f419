//! # BitTorrent Peer Wire Messages
//!
//! Message types, framing and field extraction for the peer wire protocol.
//! Everything here is pure: functions either build bytes or read exactly the
//! bytes of one frame from a reader, and never retry.
//!
//! ## Message Structure
//!
//! ```text
//! <length prefix><message ID><payload>
//! ```
//!
//! - **Length Prefix**: 4 bytes (big-endian u32) - Total length of message ID + payload
//! - **Message ID**: 1 byte - Identifies the message type
//! - **Payload**: Variable length - Message-specific data
//!
//! ## Message Types
//!
//! | ID | Name | Description |
//! |----|------|-------------|
//! | 0 | CHOKE | Peer will not send pieces (no payload) |
//! | 1 | UNCHOKE | Peer will send pieces (no payload) |
//! | 2 | INTERESTED | Client wants to download (no payload) |
//! | 3 | NOT INTERESTED | Client doesn't want to download (no payload) |
//! | 4 | HAVE | Peer has a piece (payload: piece index) |
//! | 5 | BITFIELD | Peer's piece availability (payload: bitfield) |
//! | 6 | REQUEST | Request a block (payload: index, begin, length) |
//! | 7 | PIECE | Block data (payload: index, begin, data) |
//! | 8 | CANCEL | Cancel a request (payload: index, begin, length) |
//!
//! ## Keep-Alive Messages
//!
//! A keep-alive is a frame of length 0 with no ID or payload. It decodes to
//! `None`, never to an empty `Message`.

use crate::error::{PeerError, PeerResult};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use std::io::Read;

pub type MessageId = u8;
type MessagePayload = Vec<u8>;

pub const MESSAGE_CHOKE: MessageId = 0;
pub const MESSAGE_UNCHOKE: MessageId = 1;
pub const MESSAGE_INTERESTED: MessageId = 2;
pub const MESSAGE_NOT_INTERESTED: MessageId = 3;
pub const MESSAGE_HAVE: MessageId = 4;
pub const MESSAGE_BITFIELD: MessageId = 5;
pub const MESSAGE_REQUEST: MessageId = 6;
pub const MESSAGE_PIECE: MessageId = 7;
pub const MESSAGE_CANCEL: MessageId = 8;

/// Length of the `<index><begin>` header in front of PIECE block data.
const PIECE_HEADER_LEN: usize = 8;

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type identifier
    pub id: MessageId,
    /// Message payload data
    pub payload: MessagePayload,
}

impl Message {
    /// Build a new message without payload.
    pub fn new(id: MessageId) -> Self {
        Message {
            id,
            payload: vec![],
        }
    }

    /// Build a new message with a payload.
    pub fn new_with_payload(id: MessageId, payload: MessagePayload) -> Self {
        Message { id, payload }
    }

    /// Serialize message into a length-prefixed frame.
    pub fn serialize(&self) -> Vec<u8> {
        let message_len = 1 + self.payload.len();

        let mut serialized: Vec<u8> = Vec::with_capacity(4 + message_len);
        serialized.extend_from_slice(&(message_len as u32).to_be_bytes());
        serialized.push(self.id);
        serialized.extend_from_slice(&self.payload);

        serialized
    }

    /// Human readable name of the message type, for logs.
    pub fn name(&self) -> &'static str {
        match self.id {
            MESSAGE_CHOKE => "CHOKE",
            MESSAGE_UNCHOKE => "UNCHOKE",
            MESSAGE_INTERESTED => "INTERESTED",
            MESSAGE_NOT_INTERESTED => "NOT_INTERESTED",
            MESSAGE_HAVE => "HAVE",
            MESSAGE_BITFIELD => "BITFIELD",
            MESSAGE_REQUEST => "REQUEST",
            MESSAGE_PIECE => "PIECE",
            MESSAGE_CANCEL => "CANCEL",
            _ => "UNKNOWN",
        }
    }
}

/// Serialize an optional message; `None` is the 4-byte keep-alive frame.
pub fn serialize_message(message: Option<&Message>) -> Vec<u8> {
    match message {
        Some(message) => message.serialize(),
        None => vec![0; 4],
    }
}

/// Read one frame from a stream.
///
/// Returns `Ok(None)` for a keep-alive. Blocks until the whole frame has
/// arrived; a short read is an error.
pub fn read_message<R: Read>(reader: &mut R) -> PeerResult<Option<Message>> {
    let message_len = reader
        .read_u32::<BigEndian>()
        .map_err(PeerError::from_io)? as usize;

    if message_len == 0 {
        return Ok(None);
    }

    let mut message_buf: Vec<u8> = vec![0; message_len];
    reader
        .read_exact(&mut message_buf)
        .map_err(PeerError::from_io)?;

    let payload = message_buf.split_off(1);
    Ok(Some(Message::new_with_payload(message_buf[0], payload)))
}

/// Build a REQUEST message for one block.
///
/// ```text
/// <len=0013><id=6><index: u32><begin: u32><length: u32>
/// ```
pub fn build_request(index: u32, begin: u32, length: u32) -> Message {
    let mut payload: Vec<u8> = Vec::with_capacity(12);
    // Writes into a Vec cannot fail.
    let _ = payload.write_u32::<BigEndian>(index);
    let _ = payload.write_u32::<BigEndian>(begin);
    let _ = payload.write_u32::<BigEndian>(length);

    Message::new_with_payload(MESSAGE_REQUEST, payload)
}

/// Build a HAVE message announcing a verified piece.
pub fn build_have(index: u32) -> Message {
    Message::new_with_payload(MESSAGE_HAVE, index.to_be_bytes().to_vec())
}

/// Extract the piece index from a HAVE message.
pub fn parse_have(message: &Message) -> PeerResult<u32> {
    if message.id != MESSAGE_HAVE || message.payload.len() != 4 {
        return Err(PeerError::InvalidPayload(message.payload.len()));
    }
    Ok(BigEndian::read_u32(&message.payload))
}

/// Validate a PIECE message and locate its block inside the piece buffer.
///
/// Returns `(begin, data)` where `data` borrows from the message payload.
///
/// # Errors
///
/// - `InvalidPayload` if the payload is shorter than 8 bytes
/// - `IndexMismatch` if the index field is not `expected_index`
/// - `OutOfBounds` if `begin >= buf_len` or the block runs past `buf_len`
pub fn parse_piece(
    expected_index: u32,
    buf_len: usize,
    message: &Message,
) -> PeerResult<(usize, &[u8])> {
    let payload = &message.payload;
    if payload.len() < PIECE_HEADER_LEN {
        return Err(PeerError::InvalidPayload(payload.len()));
    }

    let index = BigEndian::read_u32(&payload[0..4]);
    if index != expected_index {
        return Err(PeerError::IndexMismatch {
            expected: expected_index,
            actual: index,
        });
    }

    let begin = BigEndian::read_u32(&payload[4..8]) as usize;
    let data = &payload[PIECE_HEADER_LEN..];
    if begin >= buf_len || begin + data.len() > buf_len {
        return Err(PeerError::OutOfBounds {
            begin: begin as u64,
            end: (begin + data.len()) as u64,
            length: buf_len,
        });
    }

    Ok((begin, data))
}

/// Compact record of which pieces a peer advertises.
///
/// Bit 7 (MSB) of byte 0 is piece 0, bit 0 (LSB) of byte 0 is piece 7, and so on.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Bitfield(Vec<u8>);

impl Bitfield {
    pub fn new(bytes: Vec<u8>) -> Self {
        Bitfield(bytes)
    }

    /// `false` for any index beyond the end of the bitfield.
    pub fn has_piece(&self, index: u32) -> bool {
        let byte_index = (index / 8) as usize;
        let offset = index % 8;

        match self.0.get(byte_index) {
            Some(byte) => (*byte >> (7 - offset)) & 1 != 0,
            None => false,
        }
    }

    /// Mark a piece as present, growing the bitfield as needed.
    pub fn set_piece(&mut self, index: u32) {
        let byte_index = (index / 8) as usize;
        let offset = index % 8;

        if byte_index >= self.0.len() {
            self.0.resize(byte_index + 1, 0);
        }
        self.0[byte_index] |= 1 << (7 - offset);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
