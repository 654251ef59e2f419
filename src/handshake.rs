//! # BitTorrent Handshake Protocol
//!
//! The handshake is the first message on every peer connection, in both
//! directions, and is never repeated.
//!
//! ## Message Format
//!
//! ```text
//! <pstrlen><pstr><reserved><info_hash><peer_id>
//! ```
//!
//! - **pstrlen**: 1 byte - Length of protocol string (19 for "BitTorrent protocol")
//! - **pstr**: Variable - Protocol identifier
//! - **reserved**: 8 bytes - All zeros, no extensions are negotiated
//! - **info_hash**: 20 bytes - SHA-1 hash of torrent info dictionary
//! - **peer_id**: 20 bytes - Unique identifier for the peer
//!
//! A standard handshake is therefore 68 bytes (`49 + pstrlen`).

use crate::error::{PeerError, PeerResult};

use std::io::Read;

pub const PROTOCOL_ID: &str = "BitTorrent protocol";

const RESERVED_LEN: usize = 8;
const HASH_LEN: usize = 20;

/// A BitTorrent handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Protocol identifier bytes ("BitTorrent protocol")
    pub pstr: Vec<u8>,
    /// 20-byte SHA-1 hash of the torrent's info dictionary
    pub info_hash: [u8; 20],
    /// 20-byte identifier of the sending peer
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Creates a handshake for the standard BitTorrent protocol.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Handshake::with_protocol(PROTOCOL_ID.as_bytes().to_vec(), info_hash, peer_id)
    }

    /// Creates a handshake carrying an arbitrary protocol identifier.
    pub fn with_protocol(pstr: Vec<u8>, info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Handshake {
            pstr,
            info_hash,
            peer_id,
        }
    }

    /// Serializes the handshake for network transmission.
    ///
    /// Produces `1 + pstrlen + 8 + 20 + 20` bytes: the length byte, the
    /// protocol id, eight zero reserved bytes, the info hash and the peer id.
    pub fn serialize(&self) -> Vec<u8> {
        let mut serialized: Vec<u8> =
            Vec::with_capacity(1 + self.pstr.len() + RESERVED_LEN + 2 * HASH_LEN);

        serialized.push(self.pstr.len() as u8);
        serialized.extend_from_slice(&self.pstr);
        serialized.extend_from_slice(&[0; RESERVED_LEN]);
        serialized.extend_from_slice(&self.info_hash);
        serialized.extend_from_slice(&self.peer_id);

        serialized
    }
}

/// Reads a complete handshake from a stream.
///
/// Blocks until `1 + pstrlen + 48` bytes have arrived; a stream that closes
/// early yields an I/O error rather than a truncated handshake.
///
/// # Errors
///
/// - `HandshakeFailed` if the protocol id length byte is zero
/// - `Io` / `Timeout` if the stream fails or closes before completion
pub fn read_handshake<R: Read>(reader: &mut R) -> PeerResult<Handshake> {
    let mut len_buf = [0; 1];
    reader.read_exact(&mut len_buf).map_err(PeerError::from_io)?;

    let pstrlen = len_buf[0] as usize;
    if pstrlen == 0 {
        return Err(PeerError::HandshakeFailed(
            "invalid protocol id length 0".to_string(),
        ));
    }

    let mut buf = vec![0; pstrlen + RESERVED_LEN + 2 * HASH_LEN];
    reader.read_exact(&mut buf).map_err(PeerError::from_io)?;

    let hash_start = pstrlen + RESERVED_LEN;
    let mut info_hash = [0; HASH_LEN];
    info_hash.copy_from_slice(&buf[hash_start..hash_start + HASH_LEN]);
    let mut peer_id = [0; HASH_LEN];
    peer_id.copy_from_slice(&buf[hash_start + HASH_LEN..]);

    Ok(Handshake {
        pstr: buf[..pstrlen].to_vec(),
        info_hash,
        peer_id,
    })
}
