//! # Download Configuration
//!
//! Timeouts, pipelining limits and pacing shared by the orchestrator and
//! every peer worker. `Config::default()` carries the protocol-conventional
//! values; the command line can override the timeouts.

use std::time::Duration;

/// Default port announced to trackers.
pub const DEFAULT_PORT: u16 = 6881;

/// Maximum number of outstanding block requests per peer.
pub const DEFAULT_BACKLOG: u32 = 5;

/// Standard block size for piece downloads (16KB).
pub const DEFAULT_BLOCK_SIZE: u32 = 16384;

#[derive(Debug, Clone)]
pub struct Config {
    /// Bound on the TCP dial.
    pub connect_timeout: Duration,
    /// Bound on sending our handshake and reading the peer's.
    pub handshake_timeout: Duration,
    /// Bound on waiting for the peer to unchoke us.
    pub unchoke_timeout: Duration,
    /// Absolute deadline for downloading one piece.
    pub piece_timeout: Duration,
    /// Maximum number of block requests in flight.
    pub backlog: u32,
    /// Maximum bytes per block request.
    pub block_size: u32,
    /// Delay between successive work items on one connection.
    pub piece_pacing: Duration,
    /// Delay between successive writes to the output file.
    pub write_delay: Duration,
    /// The download fails if no verified piece arrives for this long.
    pub stall_timeout: Duration,
    /// Port announced to trackers.
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            unchoke_timeout: Duration::from_secs(60),
            piece_timeout: Duration::from_secs(30),
            backlog: DEFAULT_BACKLOG,
            block_size: DEFAULT_BLOCK_SIZE,
            piece_pacing: Duration::from_secs(1),
            write_delay: Duration::ZERO,
            stall_timeout: Duration::from_secs(120),
            port: DEFAULT_PORT,
        }
    }
}

impl Config {
    /// Bytes that may be requested but not yet received at any moment.
    pub fn max_in_flight(&self) -> u32 {
        self.backlog * self.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pipeline_is_five_blocks() {
        let config = Config::default();
        assert_eq!(config.max_in_flight(), 5 * 16384);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.piece_timeout, Duration::from_secs(30));
    }
}
