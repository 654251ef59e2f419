//! # Leech BitTorrent Client
//!
//! A command-line BitTorrent client that downloads a single-file torrent
//! from many peers at once.
//!
//! ## Features
//!
//! - Peer wire protocol: handshake, choke/unchoke, pipelined block requests
//! - Multitracker peer discovery
//! - One thread per peer, shared work queue, retry of failed pieces
//! - Piece verification with SHA-1 hashing
//! - Per-phase timeouts and a stall guard so a dead swarm cannot hang the download
//!
//! ## Usage
//!
//! ```bash
//! leech <torrent_file>
//! leech <torrent_file> -o <output_file>
//! RUST_LOG=debug leech <torrent_file> --piece-timeout 60
//! ```
//!
//! ## Architecture
//!
//! - **Main thread**: parses arguments, announces to trackers, then runs the
//!   orchestrator which writes pieces to disk
//! - **Worker threads**: each drives one peer connection
//! - **Channels**: coordinate piece work distribution and result collection

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use log::info;

use leech::config::{self, Config};
use leech::download::Download;
use leech::report::ConsoleReporter;
use leech::torrent::Torrent;
use leech::tracker;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A command-line BitTorrent client, written in Rust."
)]
struct Args {
    /// Path to the .torrent file
    torrent: PathBuf,

    /// Output filename (defaults to name from torrent)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Overwrite the output file without asking
    #[arg(short = 'y', long)]
    yes: bool,

    /// Port announced to trackers
    #[arg(short = 'p', long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Seconds allowed for a TCP connection to a peer
    #[arg(long, default_value_t = 5)]
    connect_timeout: u64,

    /// Seconds to wait for a peer to unchoke us
    #[arg(long, default_value_t = 60)]
    unchoke_timeout: u64,

    /// Seconds allowed for downloading a single piece
    #[arg(long, default_value_t = 30)]
    piece_timeout: u64,

    /// Give up when no piece completes for this many seconds
    #[arg(long, default_value_t = 120)]
    stall_timeout: u64,

    /// Milliseconds to wait between pieces on one connection
    #[arg(long, default_value_t = 1000)]
    pacing_ms: u64,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            unchoke_timeout: Duration::from_secs(self.unchoke_timeout),
            piece_timeout: Duration::from_secs(self.piece_timeout),
            stall_timeout: Duration::from_secs(self.stall_timeout),
            piece_pacing: Duration::from_millis(self.pacing_ms),
            port: self.port,
            ..Config::default()
        }
    }
}

/// Sanitize a filename to prevent path traversal and basic issues.
fn sanitize_filename(filename: &str) -> String {
    // Replace path separators with underscores to prevent directory traversal
    let safe_name = filename.replace(['/', '\\'], "_");

    // Use default name if empty or a relative directory reference
    if safe_name.trim().is_empty() || safe_name == "." || safe_name == ".." {
        "download".to_string()
    } else {
        safe_name
    }
}

/// Ask before clobbering an existing file.
fn confirm_overwrite(output: &Path) -> Result<bool> {
    println!("Output file '{}' already exists.", output.display());
    print!("Do you want to overwrite it? (y/N): ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_lowercase();

    Ok(input == "y" || input == "yes")
}

fn run(args: Args) -> Result<()> {
    if !args.torrent.exists() {
        return Err(anyhow!(
            "could not find torrent file: {}",
            args.torrent.display()
        ));
    }

    let torrent = Torrent::open(&args.torrent)?;
    let config = args.config();

    let output = match &args.output {
        Some(output) => output.clone(),
        None => PathBuf::from(sanitize_filename(torrent.name())),
    };

    if output.exists() && !args.yes && !confirm_overwrite(&output)? {
        println!("Download cancelled.");
        return Ok(());
    }

    let peer_id = tracker::generate_peer_id();
    let peers = tracker::request_peers(&torrent, &peer_id, config.port)?;
    info!("Found {} peers", peers.len());

    let reporter = Arc::new(ConsoleReporter::new(torrent.piece_count()));
    Download::new(torrent, peer_id, reporter)
        .with_config(config)
        .run(&peers, &output)?;

    println!("Saved in \"{}\".", output.display());

    Ok(())
}

fn main() {
    // Initialize logger
    pretty_env_logger::init_timed();

    // Parse arguments
    let args = Args::parse();

    // Run program, eventually exit failure
    if let Err(error) = run(args) {
        eprintln!("Error: {:#}", error);
        std::process::exit(1);
    }
}
