//! # Download Orchestration
//!
//! Fans piece work out to one worker thread per peer and writes verified
//! pieces into the output file as they come back.
//!
//! ## Multi-threading Architecture
//!
//! - **Calling thread**: owns the output file and the completion count, and is
//!   the only writer
//! - **Worker threads**: one per peer, see `worker`
//! - **Channels**: a bounded work queue shared by all workers, and a result
//!   channel drained by the calling thread
//!
//! Results arrive in any order; each is written at `index * piece_length`.
//!
//! ## Liveness
//!
//! The download fails instead of hanging when every worker has exited with
//! pieces outstanding, when no piece arrives within `stall_timeout`, or when
//! the `CancelToken` fires.

use crate::config::Config;
use crate::peer::*;
use crate::piece::*;
use crate::report::Reporter;
use crate::torrent::Torrent;
use crate::worker::*;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, never, select, unbounded, Receiver, Sender, TryRecvError};

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;

/// Observes whether a download has been cancelled.
#[derive(Clone)]
pub struct CancelToken {
    /// Disconnected once cancelled; nothing is ever sent
    signal: Receiver<()>,
}

/// Cancels the download its token belongs to, when `cancel` is called or
/// when dropped.
pub struct CancelHandle {
    _trigger: Sender<()>,
}

/// Creates a linked cancellation handle and token.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (trigger, signal) = bounded(0);
    (CancelHandle { _trigger: trigger }, CancelToken { signal })
}

impl CancelHandle {
    pub fn cancel(self) {}
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        CancelToken { signal: never() }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.signal.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Becomes ready once cancelled, for use in `select!`.
    pub fn signal(&self) -> &Receiver<()> {
        &self.signal
    }
}

/// A configured download of one torrent.
pub struct Download {
    torrent: Torrent,
    peer_id: [u8; 20],
    config: Arc<Config>,
    reporter: Arc<dyn Reporter>,
    cancel: CancelToken,
}

impl Download {
    pub fn new(torrent: Torrent, peer_id: [u8; 20], reporter: Arc<dyn Reporter>) -> Self {
        Download {
            torrent,
            peer_id,
            config: Arc::new(Config::default()),
            reporter,
            cancel: CancelToken::never(),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Downloads every piece from `peers` into `output`.
    ///
    /// The file is created (or truncated) and sized to the torrent length
    /// before any peer is contacted.
    pub fn run(&self, peers: &[Peer], output: &Path) -> Result<()> {
        let total = self.torrent.piece_count();
        info!(
            "Downloading {:?} ({} pieces, {} bytes) from {} peers",
            self.torrent.name(),
            total,
            self.torrent.length,
            peers.len()
        );

        let mut file = self.create_output(output)?;
        if total == 0 {
            return Ok(());
        }

        let (queue, closer) = WorkQueue::new(total, self.cancel.clone());
        for piece_work in self.torrent.piece_works() {
            queue
                .push(piece_work)
                .map_err(|_| anyhow!("could not send piece to work queue"))?;
        }

        let results = self.start_workers(peers, &queue)?;
        drop(queue);

        let mut completed = vec![false; total];
        let mut done = 0;
        while done < total {
            let piece_result = select! {
                recv(results) -> piece_result => match piece_result {
                    Ok(piece_result) => piece_result,
                    Err(_) => {
                        return Err(anyhow!(
                            "all peer sessions ended with {}/{} pieces downloaded",
                            done,
                            total
                        ))
                    }
                },
                recv(self.cancel.signal()) -> _ => {
                    return Err(anyhow!("download cancelled with {}/{} pieces downloaded", done, total))
                }
                default(self.config.stall_timeout) => {
                    return Err(anyhow!(
                        "no piece downloaded for {:?}, giving up with {}/{} pieces",
                        self.config.stall_timeout,
                        done,
                        total
                    ))
                }
            };

            let index = piece_result.index as usize;
            if completed[index] {
                debug!("Ignoring duplicate result for piece {}", index);
                continue;
            }

            if !self.config.write_delay.is_zero() {
                thread::sleep(self.config.write_delay);
            }
            self.write_piece(&mut file, &piece_result)?;

            completed[index] = true;
            done += 1;
            self.reporter.on_progress(done, total);
        }

        closer.close();
        file.sync_all().context("could not flush output file")?;

        info!("Download complete, saved to {}", output.display());
        Ok(())
    }

    fn create_output(&self, output: &Path) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(output)
            .with_context(|| format!("could not create output file {}", output.display()))?;
        file.set_len(self.torrent.length)
            .with_context(|| format!("could not size output file {}", output.display()))?;
        Ok(file)
    }

    /// Spawns one worker per peer and returns the channel their results arrive on.
    fn start_workers(&self, peers: &[Peer], queue: &WorkQueue) -> Result<Receiver<PieceResult>> {
        let (results_tx, results_rx) = unbounded();

        for peer in peers {
            let worker = Worker::new(
                *peer,
                self.peer_id,
                self.torrent.info_hash,
                queue.clone(),
                results_tx.clone(),
                Arc::clone(&self.config),
                Arc::clone(&self.reporter),
            );

            thread::Builder::new()
                .name(format!("peer-{}", peer.id))
                .spawn(move || {
                    worker.start_download();
                })
                .context("could not spawn peer worker")?;
        }

        Ok(results_rx)
    }

    fn write_piece(&self, file: &mut File, piece_result: &PieceResult) -> Result<()> {
        let offset = self.torrent.piece_offset(piece_result.index);
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&piece_result.data)
            .with_context(|| format!("could not write piece {} to disk", piece_result.index))
    }
}
