//! Server configuration surface.

use shared::{DEFAULT_POLL_INTERVAL, DEFAULT_PORT, DEFAULT_PROTOCOL_KEY};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Handshakes are refused once this many players are registered.
    pub max_players: usize,
    /// When set, the first player to connect becomes an admin.
    pub admin_mode: bool,
    /// IP addresses refused at handshake time.
    pub banned: Vec<String>,
    /// Global keys only the server or an admin may write.
    pub reserved_keys: Vec<String>,
    /// How often the event loop wakes up to check for shutdown.
    pub poll_interval: Duration,
    /// Key a client must present to be accepted.
    pub protocol_key: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_players: 10,
            admin_mode: false,
            banned: Vec::new(),
            reserved_keys: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            protocol_key: DEFAULT_PROTOCOL_KEY.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_players(mut self, max_players: usize) -> Self {
        self.max_players = max_players;
        self
    }

    pub fn with_admin_users(mut self, admin_mode: bool) -> Self {
        self.admin_mode = admin_mode;
        self
    }

    pub fn with_banned_users(mut self, addresses: Vec<String>) -> Self {
        self.banned = addresses;
        self
    }

    pub fn with_reserved_states(mut self, keys: Vec<String>) -> Self {
        self.reserved_keys = keys;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_protocol_key(mut self, key: impl Into<String>) -> Self {
        self.protocol_key = key.into();
        self
    }

    pub fn is_reserved(&self, key: &str) -> bool {
        self.reserved_keys.iter().any(|reserved| reserved == key)
    }
}
