//! Handshake models and delivery modes.

use crate::codec;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Protocol key clients present unless configured otherwise.
pub const DEFAULT_PROTOCOL_KEY: &str = "peerstate";

/// `ConnectionData::extra` entry holding the states a peer wants seeded on join.
pub const STATES_KEY: &str = "states";

/// Prefix marking a seeded state as belonging to the joining player.
pub const PLAYER_SCOPE_MARKER: &str = "[player]";

/// Delivery guarantees a transport may offer. Transports that cannot honour
/// a mode are free to treat every mode the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryMode {
    ReliableUnordered,
    Sequenced,
    ReliableOrdered,
    ReliableSequenced,
    Unreliable,
    Unsupported,
}

/// Sent once by a connecting peer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionData {
    pub protocol_key: String,
    pub extra: HashMap<String, Vec<u8>>,
}

impl ConnectionData {
    pub fn new(protocol_key: impl Into<String>) -> Self {
        Self {
            protocol_key: protocol_key.into(),
            extra: HashMap::new(),
        }
    }

    /// Sets an extra entry, encoding `value` with the codec.
    pub fn with_data<T: Serialize + ?Sized>(mut self, key: &str, value: &T) -> Result<Self, Error> {
        self.extra.insert(key.to_string(), codec::encode(value)?);
        Ok(self)
    }

    pub fn without_data(mut self, key: &str) -> Self {
        self.extra.remove(key);
        self
    }

    /// Stores the initial states under [`STATES_KEY`].
    pub fn with_states(self, states: &HashMap<String, Vec<u8>>) -> Result<Self, Error> {
        self.with_data(STATES_KEY, states)
    }

    /// Initial states the peer asked for. Missing or malformed data yields `None`.
    pub fn states(&self) -> Option<HashMap<String, Vec<u8>>> {
        self.extra
            .get(STATES_KEY)
            .and_then(|bytes| codec::decode_or_none(bytes))
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        codec::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        codec::decode_or_none(bytes)
    }
}

/// One incoming connection attempt. Created by the transport, decided exactly
/// once by the server engine, then handed back to the transport.
#[derive(Debug, Clone)]
pub struct ConnectionRequest {
    pub remote_address: SocketAddr,
    pub connection_data: ConnectionData,
    accepted: bool,
    rejection_message: String,
}

impl ConnectionRequest {
    pub fn new(remote_address: SocketAddr, connection_data: ConnectionData) -> Self {
        Self {
            remote_address,
            connection_data,
            accepted: false,
            rejection_message: String::new(),
        }
    }

    pub fn accept(&mut self) {
        self.accepted = true;
        self.rejection_message.clear();
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        self.accepted = false;
        self.rejection_message = reason.into();
    }

    pub fn accepted(&self) -> bool {
        self.accepted
    }

    pub fn rejection_message(&self) -> &str {
        &self.rejection_message
    }
}

/// Why a connection ended, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisconnectInfo {
    pub reason: String,
    pub message: String,
}

impl DisconnectInfo {
    pub fn new(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: message.into(),
        }
    }
}
