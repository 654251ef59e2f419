//! # BitTorrent Piece Download
//!
//! Pieces are the verification units of a torrent. They are fetched from a
//! peer in blocks of at most 16KB, with several block requests kept in flight
//! to hide network latency.
//!
//! ## Piece Download Process
//!
//! 1. **PieceWork**: one per piece index, passed between the work queue and
//!    whichever worker currently holds it
//! 2. **Pipelined fetch**: `download_piece` tops up the request backlog, then
//!    reads one message, until every byte of the piece has arrived
//! 3. **Verification**: the worker compares the SHA-1 of the assembled buffer
//!    with the expected hash before producing a `PieceResult`

use crate::client::Client;
use crate::config::Config;
use crate::error::{PeerError, PeerResult};
use crate::message::*;

use sha1::{Digest, Sha1};
use std::time::Instant;

/// A piece waiting to be downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceWork {
    /// Zero-based index of this piece in the torrent
    pub index: u32,
    /// Expected SHA-1 digest of the piece
    pub hash: [u8; 20],
    /// Length of the piece in bytes
    pub length: u32,
}

/// A downloaded piece whose digest matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceResult {
    /// Zero-based index of this piece in the torrent
    pub index: u32,
    /// Piece bytes, exactly `PieceWork::length` long
    pub data: Vec<u8>,
}

impl PieceWork {
    pub fn new(index: u32, hash: [u8; 20], length: u32) -> PieceWork {
        PieceWork {
            index,
            hash,
            length,
        }
    }

    /// Checks downloaded bytes against the expected digest.
    ///
    /// # Errors
    ///
    /// `IntegrityFailure` when the digest differs.
    pub fn verify(&self, data: &[u8]) -> PeerResult<()> {
        let digest = Sha1::digest(data);
        if digest.as_slice() != self.hash {
            return Err(PeerError::IntegrityFailure(self.index));
        }
        Ok(())
    }
}

/// Download state of the piece currently in flight.
struct PieceProgress {
    index: u32,
    buf: Vec<u8>,
    /// Bytes requested so far, from offset 0
    requested: u32,
    /// Bytes received so far
    downloaded: u32,
}

impl PieceProgress {
    fn new(work: &PieceWork) -> Self {
        PieceProgress {
            index: work.index,
            buf: vec![0; work.length as usize],
            requested: 0,
            downloaded: 0,
        }
    }

    fn length(&self) -> u32 {
        self.buf.len() as u32
    }

    fn read_message(&mut self, client: &mut Client) -> PeerResult<()> {
        let message = match client.read_message()? {
            Some(message) if message.id == MESSAGE_PIECE => message,
            Some(message) => {
                trace!(
                    "Discarding MESSAGE_{} while downloading piece {}",
                    message.name(),
                    self.index
                );
                return Ok(());
            }
            None => return Ok(()),
        };

        let (begin, data) = parse_piece(self.index, self.buf.len(), &message)?;
        self.buf[begin..begin + data.len()].copy_from_slice(data);
        self.downloaded += data.len() as u32;

        Ok(())
    }
}

/// Downloads one piece over a connection that is already unchoked.
///
/// Keeps up to `config.backlog` block requests outstanding and assembles
/// PIECE responses in whatever order they arrive. The whole call runs under
/// an absolute deadline of `config.piece_timeout`, cleared on return.
/// The returned buffer is not hashed here.
///
/// # Errors
///
/// Any read/write failure, an expired deadline, or a PIECE message rejected by
/// `parse_piece`. Nothing is retried and no partial buffer is returned.
pub fn download_piece(
    client: &mut Client,
    work: &PieceWork,
    config: &Config,
) -> PeerResult<Vec<u8>> {
    client.set_deadline(Some(Instant::now() + config.piece_timeout));
    let result = fetch_blocks(client, work, config);
    client.set_deadline(None);
    result
}

fn fetch_blocks(client: &mut Client, work: &PieceWork, config: &Config) -> PeerResult<Vec<u8>> {
    let mut progress = PieceProgress::new(work);
    let length = progress.length();
    let max_in_flight = config.max_in_flight();

    while progress.downloaded < length {
        while progress.requested < length
            && progress.requested.saturating_sub(progress.downloaded) < max_in_flight
        {
            let block_size = config.block_size.min(length - progress.requested);
            client.send_request(work.index, progress.requested, block_size)?;
            progress.requested += block_size;
        }

        progress.read_message(client)?;
    }

    Ok(progress.buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    use std::io::Write;
    use std::time::Duration;

    fn connect(addr: crate::peer::Peer) -> Client {
        Client::connect(addr, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn verify_compares_sha1() {
        let data = vec![7; 100];
        let work = PieceWork::new(4, sha1_of(&data), 100);

        assert!(work.verify(&data).is_ok());
        assert!(matches!(
            work.verify(&[0; 100]),
            Err(PeerError::IntegrityFailure(4))
        ));
    }

    #[test]
    fn two_blocks_answered_out_of_order() {
        let piece = pattern(32768, 1);
        let served = piece.clone();

        let addr = serve_one(move |mut stream| {
            let first = read_request(&mut stream);
            let second = read_request(&mut stream);
            assert_eq!(first, (0, 0, 16384));
            assert_eq!(second, (0, 16384, 16384));

            stream
                .write_all(&piece_frame(0, 16384, &served[16384..]))
                .unwrap();
            stream.write_all(&piece_frame(0, 0, &served[..16384])).unwrap();

            // No third request may follow.
            assert!(try_read_request(&mut stream).is_none());
        });

        let mut client = connect(addr);
        let work = PieceWork::new(0, sha1_of(&piece), 32768);
        let data = download_piece(&mut client, &work, &fast_config()).unwrap();

        assert_eq!(data, piece);
        drop(client);
    }

    #[test]
    fn short_last_block_and_bounded_backlog() {
        let length = 6 * 16384 + 100;
        let piece = pattern(length, 2);
        let served = piece.clone();

        let addr = serve_one(move |mut stream| {
            // The backlog is full after five requests.
            let mut pending: Vec<(u32, u32, u32)> =
                (0..5).map(|_| read_request(&mut stream)).collect();
            assert_eq!(pending[4], (3, 4 * 16384, 16384));

            stream.write_all(&serialize_message(None)).unwrap();
            stream
                .write_all(&Message::new(MESSAGE_UNCHOKE).serialize())
                .unwrap();

            let mut answered = 0;
            while let Some((index, begin, len)) = pending.pop() {
                let (begin, len) = (begin as usize, len as usize);
                stream
                    .write_all(&piece_frame(index, begin as u32, &served[begin..begin + len]))
                    .unwrap();
                answered += 1;
                if answered <= 2 {
                    pending.insert(0, read_request(&mut stream));
                }
            }
        });

        let mut client = connect(addr);
        let work = PieceWork::new(3, sha1_of(&piece), length as u32);
        let data = download_piece(&mut client, &work, &fast_config()).unwrap();

        assert_eq!(data.len(), length);
        assert!(work.verify(&data).is_ok());
    }

    #[test]
    fn wrong_index_aborts_download() {
        let addr = serve_one(|mut stream| {
            read_request(&mut stream);
            stream.write_all(&piece_frame(9, 0, &[1; 10])).unwrap();
        });

        let mut client = connect(addr);
        let work = PieceWork::new(2, [0; 20], 10);
        let err = download_piece(&mut client, &work, &fast_config()).unwrap_err();

        assert!(matches!(err, PeerError::IndexMismatch { expected: 2, actual: 9 }));
    }

    #[test]
    fn disconnect_mid_piece_is_an_error() {
        let addr = serve_one(|mut stream| {
            read_request(&mut stream);
            read_request(&mut stream);
            stream.write_all(&piece_frame(0, 0, &[1; 16384])).unwrap();
        });

        let mut client = connect(addr);
        let work = PieceWork::new(0, [0; 20], 32768);
        let err = download_piece(&mut client, &work, &fast_config()).unwrap_err();

        assert!(matches!(err, PeerError::Io(_)));
    }

    #[test]
    fn stalled_peer_hits_the_deadline() {
        let (addr, hold) = serve_and_hold();

        let mut client = connect(addr);
        let config = Config {
            piece_timeout: Duration::from_millis(200),
            ..fast_config()
        };
        let work = PieceWork::new(0, [0; 20], 100);
        let err = download_piece(&mut client, &work, &config).unwrap_err();

        assert!(matches!(err, PeerError::Timeout));
        drop(hold);
    }
}
