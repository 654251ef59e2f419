//! # HTTP Tracker Announce
//!
//! Peer discovery through HTTP trackers. Every unique tracker URL of the
//! torrent is queried in parallel and the compact peer lists are merged.
//!
//! ## Announce Request
//!
//! ```text
//! GET <announce>?info_hash=..&peer_id=..&port=..&uploaded=0&downloaded=0&left=..&compact=1
//! ```
//!
//! `info_hash` and `peer_id` are raw 20-byte strings, percent-encoded.

use crate::peer::*;
use crate::torrent::Torrent;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_bencode::de;
use serde_bytes::ByteBuf;
use url::form_urlencoded::byte_serialize;
use url::Url;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const TRACKER_TIMEOUT: Duration = Duration::from_secs(15);

/// BencodeTracker structure.
#[derive(Debug, Deserialize)]
struct BencodeTracker {
    // Human readable reason the announce was refused
    #[serde(rename = "failure reason", default)]
    failure_reason: Option<String>,
    // Interval time to refresh the list of peers in seconds
    #[serde(default)]
    interval: u32,
    // Compact peer list
    #[serde(default)]
    peers: ByteBuf,
}

/// Generate a random 20-byte peer id.
pub fn generate_peer_id() -> [u8; 20] {
    rand::random()
}

/// Build tracker URL.
///
/// # Arguments
///
/// * `announce` - The tracker URL.
/// * `info_hash` - The 20-byte SHA-1 hash of the info dictionary.
/// * `peer_id` - 20-byte string used as a unique ID for the client.
/// * `port` - Port number that the client is listening on.
/// * `left` - Bytes still to download.
///
pub fn build_tracker_url(
    announce: &str,
    info_hash: &[u8; 20],
    peer_id: &[u8; 20],
    port: u16,
    left: u64,
) -> Result<String> {
    let base_url = Url::parse(announce).with_context(|| format!("could not parse tracker url {}", announce))?;

    // Built by hand: the binary fields are not valid UTF-8.
    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1",
        byte_serialize(info_hash).collect::<String>(),
        byte_serialize(peer_id).collect::<String>(),
        port,
        left
    );

    let mut url = base_url.to_string();
    url.push(if base_url.query().is_some() { '&' } else { '?' });
    url.push_str(&query);

    Ok(url)
}

/// Decode a bencoded tracker response into its peers.
pub fn parse_tracker_response(body: &[u8]) -> Result<Vec<Peer>> {
    let response = de::from_bytes::<BencodeTracker>(body).context("could not decode tracker response")?;

    if let Some(reason) = response.failure_reason {
        return Err(anyhow!("tracker refused announce: {}", reason));
    }
    debug!(
        "Tracker returned {} peer bytes, interval {}s",
        response.peers.len(),
        response.interval
    );

    build_peers(&response.peers)
}

/// Announce to one tracker and return its peers.
pub fn announce(url: &str) -> Result<Vec<Peer>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(TRACKER_TIMEOUT)
        .build()?;

    let response = client
        .get(url)
        .send()
        .context("could not reach tracker")?
        .error_for_status()?;
    let body = response.bytes()?;

    parse_tracker_response(&body)
}

/// Request peers from every tracker of the torrent.
///
/// Trackers that fail are skipped. Peers are deduplicated by address and
/// renumbered in order.
///
/// # Errors
///
/// Returns an error when no tracker produced a single peer.
pub fn request_peers(torrent: &Torrent, peer_id: &[u8; 20], port: u16) -> Result<Vec<Peer>> {
    // Flatten all tiers into a unique list of tracker URLs
    let mut unique_urls = HashSet::new();
    let tracker_urls: Vec<String> = torrent
        .tiers
        .iter()
        .flatten()
        .filter(|url| unique_urls.insert(url.as_str()))
        .cloned()
        .collect();

    if tracker_urls.is_empty() {
        return Err(anyhow!("no tracker URLs available"));
    }

    let all_peers = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();

    for tracker_url in tracker_urls {
        let full_url =
            match build_tracker_url(&tracker_url, &torrent.info_hash, peer_id, port, torrent.length) {
                Ok(url) => url,
                Err(e) => {
                    warn!("Skipping tracker {}: {}", tracker_url, e);
                    continue;
                }
            };
        let all_peers = Arc::clone(&all_peers);

        handles.push(thread::spawn(move || match announce(&full_url) {
            Ok(peers) => {
                info!("Tracker {} returned {} peers", tracker_url, peers.len());
                if let Ok(mut guard) = all_peers.lock() {
                    guard.extend(peers);
                }
            }
            Err(e) => warn!("Tracker {} failed: {:#}", tracker_url, e),
        }));
    }

    for handle in handles {
        let _ = handle.join();
    }

    let all_peers = all_peers
        .lock()
        .map_err(|_| anyhow!("tracker thread panicked"))?
        .clone();

    // Deduplicate peers by (ip, port)
    let mut seen = HashSet::new();
    let peers: Vec<Peer> = all_peers
        .into_iter()
        .filter(|peer| seen.insert((peer.ip, peer.port)))
        .enumerate()
        .map(|(i, peer)| Peer::new(i as PeerId, peer.ip, peer.port))
        .collect();

    if peers.is_empty() {
        return Err(anyhow!("could not get peers from any tracker"));
    }

    Ok(peers)
}
