//! Datagram framing for the bundled UDP transports.
//!
//! The transports wrap protocol packets in a [`Frame`] so that connection
//! management (handshake, heartbeats, disconnects) can share the socket with
//! application data. Delivery modes travel with the data but are not enforced.

use crate::codec;
use crate::connection::DeliveryMode;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Connections silent for longer than this are dropped.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(5);

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Encoded `ConnectionData`.
    Connect { connection_data: Vec<u8> },
    Accepted,
    Rejected { reason: String },
    Payload { mode: DeliveryMode, data: Vec<u8> },
    Heartbeat,
    Disconnect { reason: String },
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        codec::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        codec::decode_or_none(bytes)
    }
}
