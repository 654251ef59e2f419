//! # Leech
//!
//! BitTorrent peer wire protocol and a concurrent piece downloader.
//!
//! The binary in `main.rs` is a thin layer over this library: it decodes the
//! torrent, asks the trackers for peers and hands both to `Download`.

#[macro_use]
extern crate log;

pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod handshake;
pub mod message;
pub mod peer;
pub mod piece;
pub mod report;
pub mod torrent;
pub mod tracker;
pub mod worker;

#[cfg(test)]
mod testing;
