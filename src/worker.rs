//! # BitTorrent Worker Thread
//!
//! This module implements the worker that manages downloading from a single peer.
//! Each worker owns one connection and pulls piece work from a queue shared
//! with every other worker.
//!
//! ## Session States
//!
//! ```text
//! Connecting -> Handshaking -> AwaitingUnchoke -> Downloading -> Closed(reason)
//! ```
//!
//! Any state may jump straight to `Closed`. A session that never reaches
//! `Downloading` never touches a piece.
//!
//! ## Piece Outcomes
//!
//! - **Verified**: the result goes to the orchestrator, the session continues
//! - **Rejected** (hash mismatch): the piece goes back on the queue and the
//!   same connection moves on to the next piece
//! - **Engine failure** (I/O, protocol violation, deadline): the piece goes
//!   back on the queue and the session ends; the connection is not reused
//!
//! ## Work Queue
//!
//! A piece is in exactly one place at a time: queued, or held by one worker.
//! Popping removes it from the queue, so two workers can never download the
//! same index concurrently, and returning it on failure cannot duplicate it.

use crate::client::*;
use crate::config::Config;
use crate::download::CancelToken;
use crate::error::PeerError;
use crate::peer::*;
use crate::piece::*;
use crate::report::{PeerEvent, Reporter};

use crossbeam_channel::{bounded, select, Receiver, SendError, Sender};
use std::sync::Arc;
use std::thread;

/// Where a peer session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    AwaitingUnchoke,
    Downloading,
}

/// Why a peer session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The TCP connection could not be opened.
    ConnectFailed,
    /// The handshake exchange failed.
    HandshakeFailed,
    /// The peer went away before unchoking us.
    Disconnected,
    /// The peer did not unchoke us within the unchoke timeout.
    UnchokeTimeout,
    /// The work queue was closed.
    NoMoreWork,
    /// A piece download failed at the wire level.
    EngineFailed,
    /// The download was cancelled.
    Cancelled,
}

/// Result of one piece attempt that kept the connection usable.
enum PieceOutcome {
    Verified(PieceResult),
    Rejected(PieceWork),
}

/// What a worker gets when it asks the queue for work.
#[derive(Debug, PartialEq, Eq)]
pub enum Pop {
    Work(PieceWork),
    Closed,
    Cancelled,
}

/// Shared queue of pieces still to download.
#[derive(Clone)]
pub struct WorkQueue {
    sender: Sender<PieceWork>,
    receiver: Receiver<PieceWork>,
    /// Disconnected once the queue is closed
    closed: Receiver<()>,
    cancel: CancelToken,
}

/// Closes a `WorkQueue` when dropped.
pub struct QueueCloser {
    _closed: Sender<()>,
}

impl QueueCloser {
    pub fn close(self) {}
}

impl WorkQueue {
    /// Creates a queue able to hold `capacity` pieces.
    pub fn new(capacity: usize, cancel: CancelToken) -> (WorkQueue, QueueCloser) {
        let (sender, receiver) = bounded(capacity.max(1));
        let (closed_tx, closed) = bounded(0);

        let queue = WorkQueue {
            sender,
            receiver,
            closed,
            cancel,
        };
        (queue, QueueCloser { _closed: closed_tx })
    }

    /// Puts a piece on the queue.
    pub fn push(&self, work: PieceWork) -> Result<(), SendError<PieceWork>> {
        self.sender.send(work)
    }

    /// Blocks until a piece is available, the queue is closed, or the
    /// download is cancelled.
    pub fn pop(&self) -> Pop {
        select! {
            recv(self.receiver) -> work => match work {
                Ok(work) => Pop::Work(work),
                Err(_) => Pop::Closed,
            },
            recv(self.closed) -> _ => Pop::Closed,
            recv(self.cancel.signal()) -> _ => Pop::Cancelled,
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }
}

/// Downloads pieces from one peer.
pub struct Worker {
    /// Address of the remote peer
    peer: Peer,
    /// 20-byte unique identifier for this client instance
    peer_id: [u8; 20],
    /// 20-byte SHA-1 hash of the torrent's info dictionary
    info_hash: [u8; 20],
    /// Pieces still to download, shared with every worker
    queue: WorkQueue,
    /// Verified pieces, consumed by the orchestrator
    results: Sender<PieceResult>,
    config: Arc<Config>,
    reporter: Arc<dyn Reporter>,
}

impl Worker {
    pub fn new(
        peer: Peer,
        peer_id: [u8; 20],
        info_hash: [u8; 20],
        queue: WorkQueue,
        results: Sender<PieceResult>,
        config: Arc<Config>,
        reporter: Arc<dyn Reporter>,
    ) -> Worker {
        Worker {
            peer,
            peer_id,
            info_hash,
            queue,
            results,
            config,
            reporter,
        }
    }

    /// Runs the session to completion and reports why it ended.
    pub fn start_download(&self) -> SessionEnd {
        let end = self.run();
        self.report(PeerEvent::Closed(end));
        end
    }

    fn run(&self) -> SessionEnd {
        self.enter(SessionState::Connecting);
        let mut client = match Client::connect(self.peer, self.config.connect_timeout) {
            Ok(client) => client,
            Err(e) => {
                debug!("Peer {}: {}", self.peer, e);
                return SessionEnd::ConnectFailed;
            }
        };

        self.enter(SessionState::Handshaking);
        match client.handshake(self.info_hash, self.peer_id, self.config.handshake_timeout) {
            Ok(remote) => self.report(PeerEvent::Handshake {
                remote_id: remote.peer_id,
            }),
            Err(e) => {
                debug!("Peer {}: {}", self.peer, e);
                return SessionEnd::HandshakeFailed;
            }
        }

        self.enter(SessionState::AwaitingUnchoke);
        if let Err(e) = client.send_interested() {
            debug!("Peer {}: could not send INTERESTED: {}", self.peer, e);
            return SessionEnd::Disconnected;
        }
        match client.wait_for_unchoke(self.config.unchoke_timeout) {
            Ok(()) => {}
            Err(PeerError::Timeout) => return SessionEnd::UnchokeTimeout,
            Err(e) => {
                debug!("Peer {} disconnected while waiting for unchoke: {}", self.peer, e);
                return SessionEnd::Disconnected;
            }
        }

        self.enter(SessionState::Downloading);
        self.download_pieces(&mut client)
    }

    fn download_pieces(&self, client: &mut Client) -> SessionEnd {
        let mut first = true;

        loop {
            if !first && !self.config.piece_pacing.is_zero() {
                thread::sleep(self.config.piece_pacing);
            }
            first = false;

            let piece_work = match self.queue.pop() {
                Pop::Work(piece_work) => piece_work,
                Pop::Closed => return SessionEnd::NoMoreWork,
                Pop::Cancelled => return SessionEnd::Cancelled,
            };

            if client.has_bitfield() && !client.has_piece(piece_work.index) {
                debug!(
                    "Peer {} did not advertise piece {}, requesting anyway",
                    self.peer, piece_work.index
                );
            }

            match self.attempt_piece(client, piece_work) {
                Ok(PieceOutcome::Verified(piece_result)) => {
                    let index = piece_result.index;
                    if self.results.send(piece_result).is_err() {
                        debug!("Peer {}: result channel closed", self.peer);
                        return SessionEnd::NoMoreWork;
                    }
                    self.report(PeerEvent::PieceVerified(index));

                    if let Err(e) = client.send_have(index) {
                        debug!("Peer {}: could not send HAVE: {}", self.peer, e);
                    }
                }
                Ok(PieceOutcome::Rejected(piece_work)) => {
                    self.report(PeerEvent::PieceRejected(piece_work.index));
                    self.requeue(piece_work);
                }
                Err((piece_work, e)) => {
                    if e.is_protocol_violation() {
                        warn!("Peer {} violated the protocol: {}", self.peer, e);
                    } else {
                        warn!(
                            "Download of piece {} from peer {} failed: {}",
                            piece_work.index, self.peer, e
                        );
                    }
                    self.requeue(piece_work);
                    return SessionEnd::EngineFailed;
                }
            }
        }
    }

    /// Downloads and verifies one piece, handing the work back on failure.
    fn attempt_piece(
        &self,
        client: &mut Client,
        piece_work: PieceWork,
    ) -> Result<PieceOutcome, (PieceWork, PeerError)> {
        debug!(
            "Requesting piece {} ({} bytes) from peer {}",
            piece_work.index, piece_work.length, self.peer
        );

        let data = match download_piece(client, &piece_work, &self.config) {
            Ok(data) => data,
            Err(e) => return Err((piece_work, e)),
        };

        match piece_work.verify(&data) {
            Ok(()) => Ok(PieceOutcome::Verified(PieceResult {
                index: piece_work.index,
                data,
            })),
            Err(_) => Ok(PieceOutcome::Rejected(piece_work)),
        }
    }

    fn requeue(&self, piece_work: PieceWork) {
        let index = piece_work.index;
        match self.queue.push(piece_work) {
            Ok(()) => debug!("Piece {} requeued, {} pending", index, self.queue.len()),
            Err(_) => error!("Could not return piece {} to the queue", index),
        }
    }

    fn enter(&self, state: SessionState) {
        self.report(PeerEvent::State(state));
    }

    fn report(&self, event: PeerEvent) {
        self.reporter.on_peer_event(&self.peer, &event);
    }
}
