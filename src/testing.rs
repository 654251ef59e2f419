//! Loopback peers and fixtures shared by the unit tests.

use crate::config::Config;
use crate::handshake::*;
use crate::message::*;
use crate::peer::Peer;
use crate::report::{PeerEvent, Reporter};
use crate::torrent::Torrent;

use byteorder::{BigEndian, ByteOrder};
use sha1::{Digest, Sha1};

use std::io::Write;
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

static NEXT_PEER_ID: AtomicU32 = AtomicU32::new(0);

fn local_peer(listener: &TcpListener) -> Peer {
    let port = listener.local_addr().unwrap().port();
    Peer::new(
        NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed),
        Ipv4Addr::LOCALHOST,
        port,
    )
}

/// Accepts one connection and hands it to `handler` on a background thread.
pub fn serve_one<F>(handler: F) -> Peer
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let peer = local_peer(&listener);

    thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            handler(stream);
        }
    });

    peer
}

/// A peer whose connections are accepted by the kernel but never answered.
/// Keep the listener alive for as long as the peer should stay silent.
pub fn serve_and_hold() -> (Peer, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let peer = local_peer(&listener);
    (peer, listener)
}

/// A peer that refuses connections.
pub fn closed_port() -> Peer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    local_peer(&listener)
}

pub fn sha1_of(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}

/// Deterministic, non-repeating-looking test content.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 7 + seed as usize * 13 + i / 251) % 251) as u8)
        .collect()
}

/// Loopback-friendly timeouts with the standard pipeline and no pacing.
pub fn fast_config() -> Config {
    Config {
        connect_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(2),
        unchoke_timeout: Duration::from_secs(5),
        piece_timeout: Duration::from_secs(5),
        piece_pacing: Duration::ZERO,
        write_delay: Duration::ZERO,
        stall_timeout: Duration::from_secs(10),
        ..Config::default()
    }
}

/// A PIECE frame carrying `data` at `begin`.
pub fn piece_frame(index: u32, begin: u32, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + data.len());
    payload.extend_from_slice(&index.to_be_bytes());
    payload.extend_from_slice(&begin.to_be_bytes());
    payload.extend_from_slice(data);
    Message::new_with_payload(MESSAGE_PIECE, payload).serialize()
}

/// Reads until the next REQUEST, returning `None` once the stream fails.
fn next_request(stream: &mut TcpStream) -> Option<(u32, u32, u32)> {
    loop {
        match read_message(stream) {
            Ok(Some(message)) if message.id == MESSAGE_REQUEST => {
                let payload = &message.payload;
                return Some((
                    BigEndian::read_u32(&payload[0..4]),
                    BigEndian::read_u32(&payload[4..8]),
                    BigEndian::read_u32(&payload[8..12]),
                ));
            }
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

/// Reads the next REQUEST as `(index, begin, length)`, skipping anything else.
pub fn read_request(stream: &mut TcpStream) -> (u32, u32, u32) {
    next_request(stream).expect("expected a REQUEST")
}

/// Like `read_request`, but gives up after two seconds or on disconnect.
pub fn try_read_request(stream: &mut TcpStream) -> Option<(u32, u32, u32)> {
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let request = next_request(stream);
    let _ = stream.set_read_timeout(None);
    request
}

/// A single-file torrent over `data`, and its pieces.
pub fn test_torrent(data: &[u8], piece_length: usize) -> (Torrent, Vec<Vec<u8>>) {
    let pieces: Vec<Vec<u8>> = data.chunks(piece_length).map(|c| c.to_vec()).collect();
    let torrent = Torrent {
        tiers: vec![vec!["http://tracker.invalid/announce".to_string()]],
        info_hash: sha1_of(data),
        pieces_hashes: pieces.iter().map(|p| sha1_of(p)).collect(),
        piece_length: piece_length as u32,
        length: data.len() as u64,
        name: "test.bin".to_string(),
    };
    (torrent, pieces)
}

/// Reads the client's handshake and answers it for `info_hash`.
pub fn answer_handshake(stream: &mut TcpStream, info_hash: [u8; 20]) {
    let handshake = read_handshake(stream).unwrap();
    assert_eq!(handshake.info_hash, info_hash);
    stream
        .write_all(&Handshake::new(info_hash, [0x55; 20]).serialize())
        .unwrap();
}

/// How a simulated seeder misbehaves.
#[derive(Debug, Clone, Default)]
pub struct SeedBehavior {
    /// Number of blocks, counted from the first one served, sent with a flipped byte.
    pub corrupt_blocks: usize,
    /// Close the connection once this many blocks have been served.
    pub hang_up_after: Option<usize>,
}

/// A seeder holding every piece: handshake, full BITFIELD, UNCHOKE once
/// INTERESTED arrives, then one PIECE per REQUEST.
pub fn seeder(
    info_hash: [u8; 20],
    pieces: Vec<Vec<u8>>,
    behavior: SeedBehavior,
) -> impl FnOnce(TcpStream) + Send + 'static {
    move |mut stream| {
        answer_handshake(&mut stream, info_hash);

        let mut bitfield = vec![0u8; pieces.len().div_ceil(8)];
        for index in 0..pieces.len() {
            bitfield[index / 8] |= 1 << (7 - index % 8);
        }
        let _ = stream.write_all(&Message::new_with_payload(MESSAGE_BITFIELD, bitfield).serialize());

        loop {
            match read_message(&mut stream) {
                Ok(Some(message)) if message.id == MESSAGE_INTERESTED => break,
                Ok(_) => continue,
                Err(_) => return,
            }
        }
        if stream
            .write_all(&Message::new(MESSAGE_UNCHOKE).serialize())
            .is_err()
        {
            return;
        }

        let mut corrupt_left = behavior.corrupt_blocks;
        let mut served = 0;
        loop {
            if behavior.hang_up_after == Some(served) {
                return;
            }
            let (index, begin, length) = match next_request(&mut stream) {
                Some(request) => request,
                None => return,
            };

            let piece = &pieces[index as usize];
            let (begin, length) = (begin as usize, length as usize);
            let mut block = piece[begin..begin + length].to_vec();
            if corrupt_left > 0 {
                block[0] ^= 0xff;
                corrupt_left -= 1;
            }

            if stream
                .write_all(&piece_frame(index, begin as u32, &block))
                .is_err()
            {
                return;
            }
            served += 1;
        }
    }
}

/// Keeps everything it is told, for assertions.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<PeerEvent>>,
    progress: Mutex<Vec<(usize, usize)>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<PeerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<(usize, usize)> {
        self.progress.lock().unwrap().clone()
    }
}

impl Reporter for RecordingReporter {
    fn on_progress(&self, done: usize, total: usize) {
        self.progress.lock().unwrap().push((done, total));
    }

    fn on_peer_event(&self, _peer: &Peer, event: &PeerEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
