//! # Download Reporting
//!
//! The orchestrator and the peer workers never print. They hand progress and
//! per-peer events to a `Reporter`, which the binary implements with log
//! lines and a progress bar.

use crate::peer::Peer;
use crate::worker::{SessionEnd, SessionState};

use indicatif::{ProgressBar, ProgressStyle};

/// Something worth knowing about one peer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The session moved to a new state.
    State(SessionState),
    /// The peer accepted our handshake.
    Handshake { remote_id: [u8; 20] },
    /// A piece downloaded from this peer matched its hash.
    PieceVerified(u32),
    /// A piece downloaded from this peer failed its hash check.
    PieceRejected(u32),
    /// The session is over.
    Closed(SessionEnd),
}

/// Receives progress from a running download.
pub trait Reporter: Send + Sync {
    /// Called after each piece is written, with `done` of `total` pieces complete.
    fn on_progress(&self, done: usize, total: usize);

    fn on_peer_event(&self, peer: &Peer, event: &PeerEvent);
}

/// Reports through the `log` facade and an `indicatif` progress bar.
pub struct ConsoleReporter {
    bar: ProgressBar,
}

impl ConsoleReporter {
    pub fn new(total_pieces: usize) -> Self {
        let bar = ProgressBar::new(total_pieces as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} {pos}/{len} pieces [{bar:40.cyan/blue}] {percent}%")
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);

        ConsoleReporter { bar }
    }
}

impl Reporter for ConsoleReporter {
    fn on_progress(&self, done: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(done as u64);

        let percent = done as f64 / total as f64 * 100.0;
        info!("Overall progress: {:.2}% ({}/{} pieces)", percent, done, total);

        if done == total {
            self.bar.finish();
        }
    }

    fn on_peer_event(&self, peer: &Peer, event: &PeerEvent) {
        match event {
            PeerEvent::State(state) => debug!("Peer {}: {:?}", peer, state),
            PeerEvent::Handshake { remote_id } => {
                debug!("Handshake with peer {} (id {:02x?})", peer, &remote_id[..8])
            }
            PeerEvent::PieceVerified(index) => info!("Piece {} verified from peer {}", index, peer),
            PeerEvent::PieceRejected(index) => {
                warn!("Integrity check failed for piece {} from peer {}", index, peer)
            }
            PeerEvent::Closed(SessionEnd::NoMoreWork) => debug!("Peer {} finished", peer),
            PeerEvent::Closed(reason) => warn!("Peer {} closed: {:?}", peer, reason),
        }
    }
}

