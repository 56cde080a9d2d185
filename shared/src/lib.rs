//! # Shared Protocol Library
//!
//! Types and helpers used by both the authoritative server and the clients:
//! the packet envelope, the replicated state stores, the connection handshake
//! models and the transport contract both dispatch engines are written against.
//!
//! ## Module Organization
//!
//! - `packet`: the wire envelope (`Packet`, `PacketKind`) and reserved targets
//! - `state`: thread-safe key/value stores for global and per-player state
//! - `connection`: handshake models and delivery modes
//! - `rpc`: fan-out modes for remote procedure calls
//! - `transport`: the contract a concrete network transport has to fulfil
//! - `frame`: datagram framing used by the bundled UDP transports
//! - `codec`: the opaque value codec (bincode)
//! - `id`: player identifier generation and recognition

pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod id;
pub mod lock;
pub mod packet;
pub mod rpc;
pub mod state;
pub mod transport;

pub use connection::{
    ConnectionData, ConnectionRequest, DeliveryMode, DisconnectInfo, DEFAULT_PROTOCOL_KEY,
    PLAYER_SCOPE_MARKER, STATES_KEY,
};
pub use error::Error;
pub use id::{generate_player_id, is_player_id, starts_with_player_id, PLAYER_ID_LEN};
pub use packet::{
    Packet, PacketKind, PONG_KEY, TARGET_ALL, TARGET_FORBIDDEN, TARGET_GLOBAL, TARGET_OTHERS,
    TARGET_PLAYERS, TARGET_SELF, TARGET_SERVER,
};
pub use rpc::RpcMode;
pub use state::{PlayerStates, Snapshot, StateStore};
pub use transport::{
    ClientEvent, ClientTransport, ConnectionHandle, ServerEvent, ServerTransport,
    EVENT_CHANNEL_CAPACITY,
};

use std::time::Duration;

/// Default delay between event loop wake-ups.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(15);

/// Default port servers listen on.
pub const DEFAULT_PORT: u16 = 9050;
