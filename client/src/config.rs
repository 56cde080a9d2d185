//! Client configuration surface.

use serde::Serialize;
use shared::{
    codec, ConnectionData, Error, DEFAULT_POLL_INTERVAL, DEFAULT_PROTOCOL_KEY, PLAYER_SCOPE_MARKER,
};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How often the event loop and pings wake up.
    pub poll_interval: Duration,
    /// Key presented to the server during the handshake.
    pub protocol_key: String,
    /// States the server seeds when it accepts this client. Player-scoped
    /// entries carry the `[player]` marker in front of their key.
    pub init_states: HashMap<String, Vec<u8>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            protocol_key: DEFAULT_PROTOCOL_KEY.to_string(),
            init_states: HashMap::new(),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_protocol_key(mut self, key: impl Into<String>) -> Self {
        self.protocol_key = key.into();
        self
    }

    pub fn with_init_states(mut self, states: HashMap<String, Vec<u8>>) -> Self {
        self.init_states.extend(states);
        self
    }

    /// Seeds a global state on join.
    pub fn with_init_state(mut self, key: impl Into<String>, value: Vec<u8>) -> Self {
        self.init_states.insert(key.into(), value);
        self
    }

    pub fn with_init_state_as<V: Serialize + ?Sized>(
        self,
        key: impl Into<String>,
        value: &V,
    ) -> Result<Self, Error> {
        Ok(self.with_init_state(key, codec::encode(value)?))
    }

    /// Seeds a state in this client's own namespace on join.
    pub fn with_player_init_state(self, key: &str, value: Vec<u8>) -> Self {
        self.with_init_state(format!("{}{}", PLAYER_SCOPE_MARKER, key), value)
    }

    /// Handshake payload sent when connecting.
    pub fn connection_data(&self) -> Result<ConnectionData, Error> {
        let data = ConnectionData::new(self.protocol_key.clone());
        if self.init_states.is_empty() {
            Ok(data)
        } else {
            data.with_states(&self.init_states)
        }
    }
}
