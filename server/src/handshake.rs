//! Connection handshake.
//!
//! A handshake runs in two steps. [`evaluate`] decides an incoming
//! [`ConnectionRequest`] and seeds global state straight away; player-scoped
//! seeds are parked in the registry because the player id only exists once the
//! transport confirms the connection. [`admit`] then registers the player and
//! applies those parked seeds.

use crate::config::ServerConfig;
use crate::registry::PlayerRegistry;
use log::{debug, info};
use shared::{
    starts_with_player_id, ConnectionHandle, ConnectionRequest, PlayerStates, StateStore,
    PLAYER_SCOPE_MARKER,
};

pub const SERVER_FULL: &str = "Server is full";
pub const BANNED: &str = "You are banned from this server";
pub const INVALID_KEY: &str = "Invalid key";

/// Accepts or rejects `request`.
///
/// Checks run in order: capacity, ban list, protocol key. A rejected request
/// applies no state at all.
pub fn evaluate(
    config: &ServerConfig,
    registry: &mut PlayerRegistry,
    global: &StateStore,
    request: &mut ConnectionRequest,
) {
    let address = request.remote_address;

    // A repeated request from an accepted endpoint already holds its slot
    let holds_slot = registry.is_accepted(address);
    if !holds_slot && registry.occupied() >= config.max_players {
        info!("Rejecting {}: server full", address);
        request.reject(SERVER_FULL);
        return;
    }
    if registry.is_banned(&address.ip().to_string()) {
        info!("Rejecting {}: banned", address);
        request.reject(BANNED);
        return;
    }
    if request.connection_data.protocol_key != config.protocol_key {
        info!("Rejecting {}: invalid protocol key", address);
        request.reject(INVALID_KEY);
        return;
    }

    request.accept();
    registry.mark_accepted(address);

    let Some(states) = request.connection_data.states() else {
        return;
    };
    for (key, value) in states {
        if config.is_reserved(&key) {
            debug!("Ignoring reserved seed state {} from {}", key, address);
            continue;
        }
        match key.strip_prefix(PLAYER_SCOPE_MARKER) {
            Some(player_key) => {
                if !config.is_reserved(player_key) {
                    registry.stage_pending(address, player_key.to_string(), value);
                }
            }
            None if starts_with_player_id(&key) => {
                debug!("Ignoring seed state {} addressed to a player namespace", key);
            }
            None => global.set(&key, value),
        }
    }
}

/// Result of admitting a confirmed connection.
#[derive(Debug, Clone)]
pub struct Admission {
    pub id: String,
    /// Connections that were registered before this player joined.
    pub previous: Vec<ConnectionHandle>,
    /// The new player's id followed by every other registered id.
    pub roster: Vec<String>,
}

/// Registers the player behind `handle` and applies its parked seed states.
pub fn admit(
    config: &ServerConfig,
    registry: &mut PlayerRegistry,
    player_states: &PlayerStates,
    handle: ConnectionHandle,
) -> Admission {
    let previous = registry.handles();
    let id = registry.add_player(handle, config.admin_mode);

    if let Some(pending) = registry.take_pending(handle) {
        for (key, value) in pending {
            if !config.is_reserved(&key) {
                player_states.set(&id, &key, value);
            }
        }
    }

    let mut roster = vec![id.clone()];
    roster.extend(registry.player_ids().into_iter().filter(|other| other != &id));

    Admission {
        id,
        previous,
        roster,
    }
}
