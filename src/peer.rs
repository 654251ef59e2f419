//! # BitTorrent Peer Information
//!
//! Addresses of remote peers, as handed out by trackers.
//!
//! ## Compact Peer Format
//!
//! The compact format consists of 6-byte entries:
//!
//! ```text
//! <IP: 4 bytes><Port: 2 bytes>
//! ```
//!
//! Both fields are in network byte order (big-endian).

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ByteOrder};

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

const PEER_SIZE: usize = 6;

pub type PeerId = u32;

/// A BitTorrent peer in the swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    /// Sequential identifier used in logs
    pub id: PeerId,
    /// IPv4 address of the peer
    pub ip: Ipv4Addr,
    /// Port number for connecting to the peer
    pub port: u16,
}

impl Peer {
    pub fn new(id: PeerId, ip: Ipv4Addr, port: u16) -> Peer {
        Peer { id, ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl From<SocketAddrV4> for Peer {
    fn from(addr: SocketAddrV4) -> Self {
        Peer::new(0, *addr.ip(), addr.port())
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}:{}", self.id, self.ip, self.port)
    }
}

/// Parses a compact peer list from a tracker response.
///
/// Peers are numbered in order of appearance.
///
/// # Errors
///
/// Returns an error if the peer list length is not a multiple of 6 bytes.
pub fn build_peers(tracker_peers: &[u8]) -> Result<Vec<Peer>> {
    if tracker_peers.len() % PEER_SIZE != 0 {
        return Err(anyhow!(
            "received invalid peers from tracker: {} bytes",
            tracker_peers.len()
        ));
    }

    let peers = tracker_peers
        .chunks_exact(PEER_SIZE)
        .enumerate()
        .map(|(i, chunk)| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = BigEndian::read_u16(&chunk[4..6]);
            Peer::new(i as PeerId, ip, port)
        })
        .collect();

    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_peers_are_decoded() {
        let data = vec![192, 168, 1, 1, 0x1a, 0xe1, 10, 0, 0, 2, 0, 80];
        let peers = build_peers(&data).unwrap();

        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0], Peer::new(0, Ipv4Addr::new(192, 168, 1, 1), 6881));
        assert_eq!(peers[1], Peer::new(1, Ipv4Addr::new(10, 0, 0, 2), 80));
        assert_eq!(peers[1].socket_addr().to_string(), "10.0.0.2:80");
    }

    #[test]
    fn ragged_peer_list_is_rejected() {
        assert!(build_peers(&[1, 2, 3, 4, 5]).is_err());
        assert!(build_peers(&[]).unwrap().is_empty());
    }
}
