//! Transport-level peer tracking for the UDP server transport
//!
//! This module handles connection health for every endpoint that completed
//! the datagram handshake:
//! - Peer admission and removal
//! - Activity timestamps refreshed by any received frame
//! - Timeout detection for peers that went silent
//!
//! It knows nothing about players; the dispatch engine maps endpoints to
//! player ids on its own.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// One endpoint that completed the handshake
#[derive(Debug)]
pub struct Peer {
    /// Network address for sending frames
    pub addr: SocketAddr,
    /// Last time we received any frame from this peer
    pub last_seen: Instant,
}

impl Peer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Checks if the peer has been silent for longer than `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Every connected endpoint of a UDP server transport
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<SocketAddr, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits `addr`. Returns false if it was already connected.
    pub fn add(&mut self, addr: SocketAddr) -> bool {
        if self.peers.contains_key(&addr) {
            return false;
        }
        info!("Peer {} connected", addr);
        self.peers.insert(addr, Peer::new(addr));
        true
    }

    /// Removes `addr`. Returns true if it was connected.
    pub fn remove(&mut self, addr: SocketAddr) -> bool {
        if self.peers.remove(&addr).is_some() {
            info!("Peer {} disconnected", addr);
            true
        } else {
            false
        }
    }

    /// Refreshes the activity timestamp of `addr`
    ///
    /// Returns false for endpoints that never completed the handshake so the
    /// caller can ignore their frames.
    pub fn touch(&mut self, addr: SocketAddr) -> bool {
        match self.peers.get_mut(&addr) {
            Some(peer) => {
                peer.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, addr: SocketAddr) -> bool {
        self.peers.contains_key(&addr)
    }

    /// Addresses of every connected peer
    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.peers.keys().copied().collect()
    }

    /// Removes and returns every peer silent for longer than `timeout`
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<SocketAddr> {
        let timed_out: Vec<SocketAddr> = self
            .peers
            .values()
            .filter(|peer| peer.is_timed_out(timeout))
            .map(|peer| peer.addr)
            .collect();

        for addr in &timed_out {
            self.remove(*addr);
        }

        timed_out
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
