//! The wire envelope.
//!
//! Every message exchanged between a client and the server is exactly one
//! [`Packet`]. The meaning of `target`, `key` and `payload` depends on the
//! packet kind:
//!
//! | kind               | target                                  | key            | payload                    |
//! |--------------------|-----------------------------------------|----------------|----------------------------|
//! | `SetState`         | player id, empty, or `"FORBIDDEN"`      | state key      | state value                |
//! | `DeleteState`      | player id, `"players"` or `"global"`    | key or empty   | empty or `Vec<String>` keep-list |
//! | `Init`             | empty                                   | `"Init"`       | [`Snapshot`](crate::Snapshot) |
//! | `Ping`             | `"server"` or a player id               | empty or `"pong"` | empty                   |
//! | `Rpc`              | player id or an RPC keyword             | method name    | arguments                  |
//! | `SelfConnected`    | empty                                   | `"Connected"`  | roster `Vec<String>`       |
//! | `PeerConnected`    | empty                                   | `"Connected"`  | UTF-8 player id            |
//! | `PeerDisconnected` | empty                                   | `"Disconnected"` | UTF-8 player id          |
//! | `Kick` / `Ban`     | empty                                   | `"Kicked"` / `"Banned"` | UTF-8 reason      |

use crate::codec;
use crate::id::PLAYER_ID_LEN;
use crate::Error;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Addresses the server itself (pings, server RPCs).
pub const TARGET_SERVER: &str = "server";
/// RPC keyword: deliver back to the sender.
pub const TARGET_SELF: &str = "self";
/// RPC keyword: deliver to every connected player.
pub const TARGET_ALL: &str = "all";
/// RPC keyword: deliver to every connected player but the sender.
pub const TARGET_OTHERS: &str = "others";
/// Delete addressing: every player-scoped store.
pub const TARGET_PLAYERS: &str = "players";
/// Delete addressing: the global store.
pub const TARGET_GLOBAL: &str = "global";
/// Marks a `SetState` the server sent back to undo a rejected write.
pub const TARGET_FORBIDDEN: &str = "FORBIDDEN";
/// Key of the answer to a relayed player ping.
pub const PONG_KEY: &str = "pong";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PacketKind {
    #[default]
    None,
    SetState,
    DeleteState,
    Init,
    Ping,
    Rpc,
    SelfConnected,
    PeerConnected,
    PeerDisconnected,
    Kick,
    Ban,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Packet {
    pub kind: PacketKind,
    pub target: String,
    pub key: String,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(
        kind: PacketKind,
        target: impl Into<String>,
        key: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            target: target.into(),
            key: key.into(),
            payload,
        }
    }

    /// Builds a packet whose payload is `data` run through the codec.
    pub fn with_data<T: Serialize + ?Sized>(
        kind: PacketKind,
        target: impl Into<String>,
        key: impl Into<String>,
        data: &T,
    ) -> Result<Self, Error> {
        Ok(Self::new(kind, target, key, codec::encode(data)?))
    }

    /// Decodes the payload as `T`. An empty or malformed payload yields `None`.
    pub fn data<T: DeserializeOwned>(&self) -> Option<T> {
        codec::decode_or_none(&self.payload)
    }

    /// Payload as UTF-8 text, used for ids and disconnect reasons.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// True when `target` is long enough to be a player id.
    pub fn is_player_scoped(&self) -> bool {
        self.target.len() == PLAYER_ID_LEN
    }

    /// Copy of this packet with `target` replaced.
    pub fn retarget(&self, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..self.clone()
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        codec::encode(self)
    }

    /// Decodes a received datagram. Malformed bytes yield `None`.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        codec::decode_or_none(bytes)
    }
}
