//! Player registry for the authoritative server
//!
//! This module tracks who is connected and what they are allowed to do:
//! - Player identity assignment and connection handle lookup
//! - Admin membership for elevated authority
//! - The IP ban list consulted at handshake time
//! - Seed states waiting for a connection to be confirmed
//!
//! The registry is plain data; the dispatch engine owns it behind a lock so
//! application threads and the event loop see a consistent roster.

use log::info;
use shared::id::generate_unique_player_id;
use shared::ConnectionHandle;
use std::collections::{HashMap, HashSet};

/// Registered players, admins, bans and pending seed states
///
/// Player entries are created when the transport confirms a connection and
/// removed when it reports a disconnect. Pending seed states are keyed by
/// remote endpoint because the player id does not exist yet when the
/// handshake is accepted.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    /// Connected players indexed by their id
    players: HashMap<String, ConnectionHandle>,
    /// Ids of players holding admin rights
    admins: HashSet<String>,
    /// Banned IP addresses, in the order they were added
    banned: Vec<String>,
    /// Player-scoped seed states staged during the handshake
    pending: HashMap<ConnectionHandle, HashMap<String, Vec<u8>>>,
    /// Endpoints whose handshake was accepted but not yet confirmed
    accepted: HashSet<ConnectionHandle>,
}

impl PlayerRegistry {
    /// Creates an empty registry with an initial ban list
    pub fn new(banned: Vec<String>) -> Self {
        Self {
            banned,
            ..Self::default()
        }
    }

    /// Registers a newly connected client and returns its player id
    ///
    /// The id is freshly generated and guaranteed not to collide with any
    /// player currently registered. When `admin_mode` is set and nobody else
    /// is connected, the new player is also made an admin.
    pub fn add_player(&mut self, handle: ConnectionHandle, admin_mode: bool) -> String {
        let id = generate_unique_player_id(|candidate| self.players.contains_key(candidate));

        if admin_mode && self.players.is_empty() {
            info!("Player {} is the first to join and becomes admin", id);
            self.admins.insert(id.clone());
        }

        info!("Player {} connected from {}", id, handle);
        self.accepted.remove(&handle);
        self.players.insert(id.clone(), handle);
        id
    }

    /// Removes the player bound to `handle`
    ///
    /// Also revokes admin rights and drops any seed states still pending for
    /// that endpoint. Returns the removed player's id, or None if the handle
    /// was never registered.
    pub fn remove_by_handle(&mut self, handle: ConnectionHandle) -> Option<String> {
        self.pending.remove(&handle);
        self.accepted.remove(&handle);

        let id = self.find_id_by_handle(handle)?;
        self.players.remove(&id);
        self.admins.remove(&id);
        info!("Player {} disconnected", id);
        Some(id)
    }

    /// Finds the player id registered for a connection handle
    pub fn find_id_by_handle(&self, handle: ConnectionHandle) -> Option<String> {
        self.players
            .iter()
            .find(|(_, h)| **h == handle)
            .map(|(id, _)| id.clone())
    }

    /// Looks up the connection handle of a player
    pub fn handle_of(&self, id: &str) -> Option<ConnectionHandle> {
        self.players.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.players.contains_key(id)
    }

    /// Ids of every registered player
    pub fn player_ids(&self) -> Vec<String> {
        self.players.keys().cloned().collect()
    }

    /// Connection handles of every registered player
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.players.values().copied().collect()
    }

    /// Copy of the id to handle mapping
    pub fn players(&self) -> HashMap<String, ConnectionHandle> {
        self.players.clone()
    }

    pub fn is_admin(&self, id: &str) -> bool {
        self.admins.contains(id)
    }

    pub fn admins(&self) -> Vec<String> {
        self.admins.iter().cloned().collect()
    }

    /// Adds an IP address to the ban list
    ///
    /// Adding an address twice is a no-op.
    pub fn ban(&mut self, address: String) {
        if !self.banned.contains(&address) {
            info!("Banning address {}", address);
            self.banned.push(address);
        }
    }

    pub fn is_banned(&self, address: &str) -> bool {
        self.banned.iter().any(|banned| banned == address)
    }

    pub fn banned(&self) -> Vec<String> {
        self.banned.clone()
    }

    /// Holds a slot for an endpoint whose handshake was accepted
    pub fn mark_accepted(&mut self, handle: ConnectionHandle) {
        self.accepted.insert(handle);
    }

    /// Returns true if `handle` holds a slot but is not registered yet
    pub fn is_accepted(&self, handle: ConnectionHandle) -> bool {
        self.accepted.contains(&handle)
    }

    /// Returns registered players plus accepted endpoints still awaiting confirmation
    pub fn occupied(&self) -> usize {
        self.players.len() + self.accepted.len()
    }

    /// Stages a player-scoped seed state for an endpoint whose handshake was accepted
    pub fn stage_pending(&mut self, handle: ConnectionHandle, key: String, value: Vec<u8>) {
        self.pending.entry(handle).or_default().insert(key, value);
    }

    /// Takes every seed state staged for `handle`
    pub fn take_pending(&mut self, handle: ConnectionHandle) -> Option<HashMap<String, Vec<u8>>> {
        self.pending.remove(&handle)
    }

    /// Forgets every player, admin and pending seed. The ban list survives.
    pub fn clear(&mut self) {
        self.players.clear();
        self.admins.clear();
        self.pending.clear();
        self.accepted.clear();
    }

    /// Returns the number of registered players
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Returns true if no player is registered
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{is_player_id, PLAYER_ID_LEN};

    fn test_addr() -> ConnectionHandle {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> ConnectionHandle {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_registry_creation() {
        let registry = PlayerRegistry::new(vec!["10.0.0.1".to_string()]);
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.is_banned("10.0.0.1"));
    }

    #[test]
    fn test_add_player_assigns_id() {
        let mut registry = PlayerRegistry::default();
        let id = registry.add_player(test_addr(), false);

        assert_eq!(id.len(), PLAYER_ID_LEN);
        assert!(is_player_id(&id));
        assert_eq!(registry.handle_of(&id), Some(test_addr()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let mut registry = PlayerRegistry::default();
        let id1 = registry.add_player(test_addr(), false);
        let id2 = registry.add_player(test_addr2(), false);
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_first_player_becomes_admin() {
        let mut registry = PlayerRegistry::default();
        let first = registry.add_player(test_addr(), true);
        let second = registry.add_player(test_addr2(), true);

        assert!(registry.is_admin(&first));
        assert!(!registry.is_admin(&second));
        assert_eq!(registry.admins(), vec![first]);
    }

    #[test]
    fn test_no_admin_without_admin_mode() {
        let mut registry = PlayerRegistry::default();
        let first = registry.add_player(test_addr(), false);
        assert!(!registry.is_admin(&first));
    }

    #[test]
    fn test_remove_by_handle() {
        let mut registry = PlayerRegistry::default();
        let id = registry.add_player(test_addr(), true);

        assert_eq!(registry.remove_by_handle(test_addr()), Some(id.clone()));
        assert!(!registry.contains(&id));
        assert!(!registry.is_admin(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown_handle() {
        let mut registry = PlayerRegistry::default();
        assert_eq!(registry.remove_by_handle(test_addr()), None);
    }

    #[test]
    fn test_find_id_by_handle() {
        let mut registry = PlayerRegistry::default();
        let id1 = registry.add_player(test_addr(), false);
        let _id2 = registry.add_player(test_addr2(), false);

        assert_eq!(registry.find_id_by_handle(test_addr()), Some(id1));

        let unknown: ConnectionHandle = "192.168.1.1:9999".parse().unwrap();
        assert_eq!(registry.find_id_by_handle(unknown), None);
    }

    #[test]
    fn test_ban_is_deduplicated() {
        let mut registry = PlayerRegistry::default();
        registry.ban("10.0.0.2".to_string());
        registry.ban("10.0.0.2".to_string());
        assert_eq!(registry.banned(), vec!["10.0.0.2".to_string()]);
    }

    #[test]
    fn test_pending_states() {
        let mut registry = PlayerRegistry::default();
        registry.stage_pending(test_addr(), "hp".to_string(), vec![100]);
        registry.stage_pending(test_addr(), "hp".to_string(), vec![90]);

        let pending = registry.take_pending(test_addr()).unwrap();
        assert_eq!(pending.get("hp"), Some(&vec![90]));
        assert!(registry.take_pending(test_addr()).is_none());
    }

    #[test]
    fn test_clear_keeps_bans() {
        let mut registry = PlayerRegistry::new(vec!["10.0.0.1".to_string()]);
        registry.add_player(test_addr(), true);
        registry.clear();

        assert!(registry.is_empty());
        assert!(registry.admins().is_empty());
        assert!(registry.is_banned("10.0.0.1"));
    }

    #[test]
    fn test_accepted_endpoint_holds_a_slot() {
        let mut registry = PlayerRegistry::default();
        registry.mark_accepted(test_addr());
        assert_eq!(registry.occupied(), 1);
        assert!(registry.is_empty());

        registry.add_player(test_addr(), false);
        assert!(!registry.is_accepted(test_addr()));
        assert_eq!(registry.occupied(), 1);

        registry.remove_by_handle(test_addr());
        assert_eq!(registry.occupied(), 0);
    }
}
