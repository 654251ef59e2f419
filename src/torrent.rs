//! # BitTorrent Torrent Metadata
//!
//! Decoding of single-file `.torrent` descriptors.
//!
//! ## Torrent File Format
//!
//! Torrent files contain metadata in bencoded format:
//!
//! - **announce**: Tracker URL for peer discovery
//! - **announce-list**: Optional tiers of tracker URLs
//! - **info**: Dictionary with file information and piece hashes
//!   - **pieces**: Concatenated SHA-1 hashes for integrity verification
//!   - **piece length**: Size of each piece (typically 256KB-1MB)
//!   - **length**: Total file size
//!   - **name**: Suggested filename
//!
//! The info hash is the SHA-1 of the `info` dictionary re-encoded as received,
//! including keys this client does not use.

use crate::piece::PieceWork;

use anyhow::{anyhow, Context, Result};
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_bencode::value::Value;
use serde_bencode::{de, ser};
use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};

use std::fs;
use std::path::Path;

// Size of SHA-1 hash in bytes
const SHA1_HASH_SIZE: usize = 20;

/// Metadata of a single-file torrent.
#[derive(Default, Debug, Clone)]
pub struct Torrent {
    /// Tracker tiers for peer discovery (each tier is a list of URLs)
    pub tiers: Vec<Vec<String>>,
    /// 20-byte SHA-1 hash of the bencoded info dictionary
    pub info_hash: [u8; 20],
    /// One 20-byte SHA-1 hash per piece
    pub pieces_hashes: Vec<[u8; 20]>,
    /// Size of each piece in bytes (except possibly the last)
    pub piece_length: u32,
    /// Total size of the file in bytes
    pub length: u64,
    /// Suggested filename from torrent metadata
    pub name: String,
}

/// BencodeInfo structure.
#[derive(Deserialize)]
struct BencodeInfo {
    // Concatenation of all pieces 20-byte SHA-1 hashes
    pieces: ByteBuf,
    // Size of each piece in bytes
    #[serde(rename = "piece length")]
    piece_length: u32,
    // Size of the file in bytes
    length: u64,
    // Suggested filename where to save the file
    name: String,
}

/// BencodeTorrent structure.
#[derive(Deserialize)]
struct BencodeTorrent {
    // URL of the tracker
    #[serde(default)]
    announce: String,
    // List of tracker URLs
    #[serde(rename = "announce-list", default)]
    announce_list: Vec<Vec<String>>,
    // Kept generic so the info hash covers every key
    info: Value,
}

impl BencodeInfo {
    /// Split bencoded pieces into 20-byte SHA-1 hashes.
    fn split_pieces_hashes(&self) -> Result<Vec<[u8; 20]>> {
        if self.pieces.len() % SHA1_HASH_SIZE != 0 {
            return Err(anyhow!(
                "torrent is invalid: pieces field of {} bytes",
                self.pieces.len()
            ));
        }

        let hashes = self
            .pieces
            .chunks_exact(SHA1_HASH_SIZE)
            .map(|chunk| {
                let mut hash = [0; SHA1_HASH_SIZE];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        Ok(hashes)
    }
}

impl Torrent {
    /// Open and decode a torrent file.
    pub fn open(filepath: &Path) -> Result<Torrent> {
        let buf = fs::read(filepath)
            .with_context(|| format!("could not open torrent {}", filepath.display()))?;
        Torrent::from_bytes(&buf)
    }

    /// Decode a bencoded torrent.
    pub fn from_bytes(buf: &[u8]) -> Result<Torrent> {
        let bencode = de::from_bytes::<BencodeTorrent>(buf).context("could not decode torrent")?;

        let info_bytes = ser::to_bytes(&bencode.info).context("could not encode torrent info")?;
        let info_hash: [u8; 20] = Sha1::digest(&info_bytes).into();
        let info = de::from_bytes::<BencodeInfo>(&info_bytes)
            .context("torrent info is missing required fields")?;

        let tiers = if !bencode.announce_list.is_empty() {
            // Shuffle each tier as per BEP 12
            let mut tiers = bencode.announce_list;
            let mut rng = rand::thread_rng();
            for tier in &mut tiers {
                tier.shuffle(&mut rng);
            }
            tiers
        } else if !bencode.announce.is_empty() {
            vec![vec![bencode.announce]]
        } else {
            return Err(anyhow!("torrent has no announce or announce-list"));
        };

        let torrent = Torrent {
            tiers,
            info_hash,
            pieces_hashes: info.split_pieces_hashes()?,
            piece_length: info.piece_length,
            length: info.length,
            name: info.name,
        };
        torrent.validate()?;

        Ok(torrent)
    }

    /// Check the piece hashes cover exactly `length` bytes.
    fn validate(&self) -> Result<()> {
        if self.piece_length == 0 {
            return Err(anyhow!("torrent is invalid: piece length is 0"));
        }

        let expected = self.length.div_ceil(self.piece_length as u64);
        if expected != self.pieces_hashes.len() as u64 {
            return Err(anyhow!(
                "torrent is invalid: {} bytes need {} pieces, found {} hashes",
                self.length,
                expected,
                self.pieces_hashes.len()
            ));
        }

        Ok(())
    }

    /// Returns the suggested filename from the torrent metadata.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn piece_count(&self) -> usize {
        self.pieces_hashes.len()
    }

    /// Byte offset of a piece within the file.
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length as u64
    }

    /// Length of a piece; only the last one may be short.
    pub fn piece_length_at(&self, index: u32) -> u32 {
        let begin = self.piece_offset(index);
        let end = (begin + self.piece_length as u64).min(self.length);
        end.saturating_sub(begin) as u32
    }

    /// One work item per piece, in index order.
    pub fn piece_works(&self) -> Vec<PieceWork> {
        self.pieces_hashes
            .iter()
            .enumerate()
            .map(|(index, hash)| {
                let index = index as u32;
                PieceWork::new(index, *hash, self.piece_length_at(index))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bencoded(announce: &str, info_extra: &str, pieces: &[u8], piece_length: u32, length: u64) -> Vec<u8> {
        let mut buf = format!("d8:announce{}:{}4:infod", announce.len(), announce).into_bytes();
        buf.extend_from_slice(format!("6:lengthi{}e4:name8:file.iso", length).as_bytes());
        buf.extend_from_slice(format!("12:piece lengthi{}e6:pieces{}:", piece_length, pieces.len()).as_bytes());
        buf.extend_from_slice(pieces);
        buf.extend_from_slice(info_extra.as_bytes());
        buf.extend_from_slice(b"ee");
        buf
    }

    #[test]
    fn decode_single_file_torrent() {
        let pieces = [[1u8; 20], [2u8; 20], [3u8; 20]].concat();
        let buf = bencoded("http://tracker.example/announce", "", &pieces, 32768, 70000);

        let torrent = Torrent::from_bytes(&buf).unwrap();
        assert_eq!(torrent.tiers, vec![vec!["http://tracker.example/announce".to_string()]]);
        assert_eq!(torrent.name(), "file.iso");
        assert_eq!(torrent.piece_count(), 3);
        assert_eq!(torrent.pieces_hashes[1], [2; 20]);
        assert_eq!(torrent.piece_length, 32768);
        assert_eq!(torrent.length, 70000);
    }

    #[test]
    fn info_hash_covers_the_raw_info_dictionary() {
        let pieces = [7u8; 20];
        let buf = bencoded("http://t/a", "7:privatei1e", &pieces, 16, 10);
        let torrent = Torrent::from_bytes(&buf).unwrap();

        let start = buf.windows(6).position(|w| w == b"4:info").unwrap() + 6;
        let info = &buf[start..buf.len() - 1];
        let expected: [u8; 20] = Sha1::digest(info).into();
        assert_eq!(torrent.info_hash, expected);
    }

    #[test]
    fn piece_geometry() {
        let torrent = Torrent {
            pieces_hashes: vec![[0; 20]; 3],
            piece_length: 32768,
            length: 70000,
            ..Default::default()
        };

        assert_eq!(torrent.piece_offset(2), 65536);
        assert_eq!(torrent.piece_length_at(0), 32768);
        assert_eq!(torrent.piece_length_at(2), 70000 - 65536);

        let works = torrent.piece_works();
        assert_eq!(works.len(), 3);
        assert_eq!(works[2].index, 2);
        assert_eq!(works[2].length, 4464);
    }

    #[test]
    fn reject_ragged_pieces() {
        let buf = bencoded("http://t/a", "", &[0; 30], 16, 20);
        assert!(Torrent::from_bytes(&buf).is_err());
    }

    #[test]
    fn reject_hash_count_mismatch() {
        let buf = bencoded("http://t/a", "", &[0; 40], 16, 100);
        assert!(Torrent::from_bytes(&buf).is_err());
    }

    #[test]
    fn reject_missing_tracker() {
        let buf = bencoded("", "", &[0; 20], 16, 10);
        assert!(Torrent::from_bytes(&buf).is_err());
    }
}
