//! # Peer Wire Errors
//!
//! Every failure the core can surface while talking to a peer. Codec functions
//! return these to their immediate caller; the piece engine propagates them
//! unchanged and the worker decides whether the connection survives.
//!
//! | Variant | Raised by | Connection survives? |
//! |---------|-----------|----------------------|
//! | `ConnectFailed` | dial | no (never opened) |
//! | `HandshakeFailed` | handshake exchange | no |
//! | `InvalidPayload`, `IndexMismatch`, `OutOfBounds` | PIECE validation | no |
//! | `Io`, `Timeout` | any read or write | no |
//! | `IntegrityFailure` | digest check | yes |

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    /// TCP connection could not be established within the connect timeout.
    #[error("could not connect to peer: {0}")]
    ConnectFailed(#[source] io::Error),

    /// Malformed handshake, zero-length protocol id, wrong info hash or disconnect.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// PIECE payload shorter than its 8-byte header.
    #[error("invalid PIECE payload: {0} bytes")]
    InvalidPayload(usize),

    /// PIECE message for a different piece than the one being downloaded.
    #[error("expected piece index {expected}, got {actual}")]
    IndexMismatch { expected: u32, actual: u32 },

    /// PIECE block that does not fit inside the piece buffer.
    #[error("block [{begin}:{end}] out of bounds for piece of {length} bytes")]
    OutOfBounds { begin: u64, end: u64, length: usize },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// An absolute deadline on the connection expired.
    #[error("deadline exceeded")]
    Timeout,

    /// A complete piece whose SHA-1 does not match the expected hash.
    #[error("integrity check failed for piece {0}")]
    IntegrityFailure(u32),
}

impl PeerError {
    /// True for the three PIECE validation failures.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            PeerError::InvalidPayload(_)
                | PeerError::IndexMismatch { .. }
                | PeerError::OutOfBounds { .. }
        )
    }

    /// Map an I/O error onto the taxonomy, folding socket timeouts into `Timeout`.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => PeerError::Timeout,
            _ => PeerError::Io(err),
        }
    }
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
