//! # BitTorrent Peer Client
//!
//! One live TCP connection to a remote peer, and the protocol steps that run
//! on it before any piece can be requested.
//!
//! ## Protocol Overview
//!
//! 1. **Dial**: TCP connect, bounded by the connect timeout
//! 2. **Handshake**: exchange handshakes, check the peer serves our info hash
//! 3. **Interest**: send INTERESTED
//! 4. **Unchoke wait**: read until the peer sends UNCHOKE, recording any
//!    BITFIELD or HAVE seen on the way
//!
//! After that the connection belongs to the piece engine, which pipelines
//! REQUEST messages and reads PIECE responses through the same `Client`.
//!
//! ## Deadlines
//!
//! A deadline is an absolute instant covering every read and write until it is
//! cleared. Before each socket operation the remaining time is installed as
//! the socket timeout, so a slow trickle of bytes cannot stretch a phase past
//! its bound. An expired deadline surfaces as `PeerError::Timeout`.

use crate::error::{PeerError, PeerResult};
use crate::handshake::*;
use crate::message::*;
use crate::peer::*;

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

/// A connection to a remote BitTorrent peer.
pub struct Client {
    /// Address of the remote peer
    peer: Peer,
    /// TCP stream connection to the peer
    conn: TcpStream,
    /// Pieces the peer advertised through BITFIELD and HAVE
    bitfield: Bitfield,
    /// Whether the peer has choked this client
    choked: bool,
    /// Absolute bound on all socket operations, if any
    deadline: Option<Instant>,
    /// Whether socket timeouts are currently installed
    timeouts_armed: bool,
}

impl Client {
    /// Dials the peer.
    ///
    /// # Errors
    ///
    /// `ConnectFailed` on refusal, unreachable host, or when `timeout` expires.
    pub fn connect(peer: Peer, timeout: Duration) -> PeerResult<Client> {
        let conn = TcpStream::connect_timeout(&peer.socket_addr(), timeout)
            .map_err(PeerError::ConnectFailed)?;

        debug!("Connected to peer {}", peer);

        Ok(Client::from_stream(peer, conn))
    }

    /// Wraps an already connected stream.
    pub fn from_stream(peer: Peer, conn: TcpStream) -> Client {
        Client {
            peer,
            conn,
            bitfield: Bitfield::default(),
            choked: true,
            deadline: None,
            timeouts_armed: false,
        }
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn is_choked(&self) -> bool {
        self.choked
    }

    /// Whether the peer advertised `index`.
    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield.has_piece(index)
    }

    /// Whether the peer advertised anything at all.
    pub fn has_bitfield(&self) -> bool {
        !self.bitfield.is_empty()
    }

    /// Sets (or with `None`, clears) the absolute deadline for socket operations.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Installs the time left before the deadline as the socket timeout.
    fn arm_timeouts(&mut self) -> io::Result<()> {
        match self.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "connection deadline exceeded",
                    ));
                }
                self.conn.set_read_timeout(Some(remaining))?;
                self.conn.set_write_timeout(Some(remaining))?;
                self.timeouts_armed = true;
            }
            None if self.timeouts_armed => {
                self.conn.set_read_timeout(None)?;
                self.conn.set_write_timeout(None)?;
                self.timeouts_armed = false;
            }
            None => {}
        }
        Ok(())
    }

    /// Exchanges handshakes with the peer.
    ///
    /// Sends ours, then reads theirs and checks it names the same torrent.
    /// Every failure, including a timeout, is reported as `HandshakeFailed`.
    pub fn handshake(
        &mut self,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        timeout: Duration,
    ) -> PeerResult<Handshake> {
        self.set_deadline(Some(Instant::now() + timeout));
        let result = self.exchange_handshakes(info_hash, peer_id);
        self.set_deadline(None);

        let remote = result.map_err(|e| match e {
            PeerError::HandshakeFailed(reason) => PeerError::HandshakeFailed(reason),
            other => PeerError::HandshakeFailed(other.to_string()),
        })?;

        if remote.info_hash != info_hash {
            return Err(PeerError::HandshakeFailed(
                "peer answered for a different info hash".to_string(),
            ));
        }

        Ok(remote)
    }

    fn exchange_handshakes(
        &mut self,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> PeerResult<Handshake> {
        let handshake = Handshake::new(info_hash, peer_id);
        self.write_all(&handshake.serialize())
            .map_err(PeerError::from_io)?;

        read_handshake(self)
    }

    /// Sends one message.
    pub fn send(&mut self, message: &Message) -> PeerResult<()> {
        trace!("Send MESSAGE_{} to peer {}", message.name(), self.peer);
        self.write_all(&message.serialize())
            .map_err(PeerError::from_io)
    }

    /// Sends an INTERESTED message.
    pub fn send_interested(&mut self) -> PeerResult<()> {
        self.send(&Message::new(MESSAGE_INTERESTED))
    }

    /// Sends a REQUEST for one block.
    pub fn send_request(&mut self, index: u32, begin: u32, length: u32) -> PeerResult<()> {
        trace!(
            "Request piece {} [{}:{}] from peer {}",
            index,
            begin,
            begin + length,
            self.peer
        );
        self.send(&build_request(index, begin, length))
    }

    /// Sends a HAVE message for a verified piece.
    pub fn send_have(&mut self, index: u32) -> PeerResult<()> {
        self.send(&build_have(index))
    }

    /// Reads the next frame; `None` is a keep-alive.
    pub fn read_message(&mut self) -> PeerResult<Option<Message>> {
        read_message(self)
    }

    /// Reads messages until the peer unchokes us.
    ///
    /// Keep-alives and unrelated messages are skipped. BITFIELD and HAVE
    /// update the recorded bitfield. Fails with `Timeout` if `timeout`
    /// elapses first, or with the read error if the peer disconnects.
    pub fn wait_for_unchoke(&mut self, timeout: Duration) -> PeerResult<()> {
        self.set_deadline(Some(Instant::now() + timeout));
        let result = self.read_until_unchoke();
        self.set_deadline(None);
        result
    }

    fn read_until_unchoke(&mut self) -> PeerResult<()> {
        while self.choked {
            let message = match self.read_message()? {
                Some(message) => message,
                None => continue,
            };

            match message.id {
                MESSAGE_UNCHOKE => self.choked = false,
                MESSAGE_BITFIELD => self.bitfield = Bitfield::new(message.payload),
                MESSAGE_HAVE => match parse_have(&message) {
                    Ok(index) => self.bitfield.set_piece(index),
                    Err(e) => debug!("Ignoring malformed HAVE from peer {}: {}", self.peer, e),
                },
                _ => trace!(
                    "Ignoring MESSAGE_{} from peer {} while choked",
                    message.name(),
                    self.peer
                ),
            }
        }

        Ok(())
    }
}

impl Read for Client {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.arm_timeouts()?;
        self.conn.read(buf)
    }
}

impl Write for Client {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.arm_timeouts()?;
        self.conn.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.conn.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[test]
    fn handshake_and_unchoke() {
        let info_hash = [3; 20];
        let addr = serve_one(move |mut stream| {
            let handshake = read_handshake(&mut stream).unwrap();
            assert_eq!(handshake.info_hash, info_hash);
            stream
                .write_all(&Handshake::new(info_hash, [8; 20]).serialize())
                .unwrap();

            let interested = read_message(&mut stream).unwrap().unwrap();
            assert_eq!(interested.id, MESSAGE_INTERESTED);

            stream.write_all(&serialize_message(None)).unwrap();
            stream
                .write_all(&Message::new_with_payload(MESSAGE_BITFIELD, vec![0b0100_0000]).serialize())
                .unwrap();
            stream.write_all(&build_have(3).serialize()).unwrap();
            stream.write_all(&Message::new(MESSAGE_UNCHOKE).serialize()).unwrap();
        });

        let mut client = Client::connect(addr, Duration::from_secs(5)).unwrap();
        let remote = client
            .handshake(info_hash, [1; 20], Duration::from_secs(5))
            .unwrap();
        assert_eq!(remote.peer_id, [8; 20]);

        client.send_interested().unwrap();
        client.wait_for_unchoke(Duration::from_secs(5)).unwrap();

        assert!(!client.is_choked());
        assert!(client.has_piece(1));
        assert!(client.has_piece(3));
        assert!(!client.has_piece(0));
    }

    #[test]
    fn wrong_info_hash_fails_handshake() {
        let addr = serve_one(|mut stream| {
            read_handshake(&mut stream).unwrap();
            stream
                .write_all(&Handshake::new([0xee; 20], [8; 20]).serialize())
                .unwrap();
        });

        let mut client = Client::connect(addr, Duration::from_secs(5)).unwrap();
        let err = client
            .handshake([3; 20], [1; 20], Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, PeerError::HandshakeFailed(_)));
    }

    #[test]
    fn silent_peer_times_out_waiting_for_unchoke() {
        let (addr, hold) = serve_and_hold();

        let mut client = Client::connect(addr, Duration::from_secs(5)).unwrap();
        let started = Instant::now();
        let err = client
            .wait_for_unchoke(Duration::from_millis(200))
            .unwrap_err();

        assert!(matches!(err, PeerError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(hold);
    }

    #[test]
    fn refused_dial_is_connect_failed() {
        let addr = closed_port();
        let err = Client::connect(addr, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, PeerError::ConnectFailed(_)));
    }
}
