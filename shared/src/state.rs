//! Replicated key/value state.
//!
//! A [`StateStore`] maps state keys to opaque values. The server keeps one for
//! global state and one per player ([`PlayerStates`]); clients mirror both.
//! Both types are safe to share between the event loop and application
//! threads. Single-key operations are atomic; sweeping operations take a
//! snapshot of the keys first and then remove entries one at a time, so a key
//! inserted concurrently with a sweep may or may not survive it.

use crate::codec;
use crate::lock::{read, write};
use crate::Error;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
pub struct StateStore {
    states: RwLock<HashMap<String, Vec<u8>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(states: HashMap<String, Vec<u8>>) -> Self {
        Self {
            states: RwLock::new(states),
        }
    }

    /// Returns the value for `key`, or an empty vector if it is absent.
    pub fn get(&self, key: &str) -> Vec<u8> {
        read(&self.states).get(key).cloned().unwrap_or_default()
    }

    /// Decodes the value for `key`. Missing or malformed values yield `None`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        codec::decode_or_none(&self.get(key))
    }

    pub fn set(&self, key: &str, value: Vec<u8>) {
        write(&self.states).insert(key.to_string(), value);
    }

    pub fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), Error> {
        self.set(key, codec::encode(value)?);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        write(&self.states).remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        read(&self.states).contains_key(key)
    }

    pub fn clear(&self) {
        write(&self.states).clear();
    }

    /// Removes every key not listed in `keep`.
    pub fn clear_except<S: AsRef<str>>(&self, keep: &[S]) {
        for key in self.keys() {
            if !keep.iter().any(|k| k.as_ref() == key) {
                self.remove(&key);
            }
        }
    }

    /// Removes every key listed in `keys`.
    pub fn clear_including<S: AsRef<str>>(&self, keys: &[S]) {
        for key in self.keys() {
            if keys.iter().any(|k| k.as_ref() == key) {
                self.remove(&key);
            }
        }
    }

    pub fn keys(&self) -> Vec<String> {
        read(&self.states).keys().cloned().collect()
    }

    /// Point-in-time copy of every entry.
    pub fn entries(&self) -> HashMap<String, Vec<u8>> {
        read(&self.states).clone()
    }

    /// Replaces the whole content with `states`.
    pub fn replace_all(&self, states: HashMap<String, Vec<u8>>) {
        *write(&self.states) = states;
    }

    pub fn len(&self) -> usize {
        read(&self.states).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.states).is_empty()
    }
}

/// Per-player stores, keyed by player id.
///
/// A store outlives its player's connection: it is only dropped when cleared
/// explicitly or when the owning engine stops.
#[derive(Debug, Default)]
pub struct PlayerStates {
    players: RwLock<HashMap<String, Arc<StateStore>>>,
}

impl PlayerStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, player: &str) -> Option<Arc<StateStore>> {
        read(&self.players).get(player).cloned()
    }

    pub fn get_or_create(&self, player: &str) -> Arc<StateStore> {
        if let Some(store) = self.get(player) {
            return store;
        }
        write(&self.players)
            .entry(player.to_string())
            .or_default()
            .clone()
    }

    pub fn contains_player(&self, player: &str) -> bool {
        read(&self.players).contains_key(player)
    }

    /// Value of `key` in `player`'s store, empty if either is missing.
    pub fn get_value(&self, player: &str, key: &str) -> Vec<u8> {
        self.get(player)
            .map(|store| store.get(key))
            .unwrap_or_default()
    }

    pub fn set(&self, player: &str, key: &str, value: Vec<u8>) {
        self.get_or_create(player).set(key, value);
    }

    pub fn remove(&self, player: &str, key: &str) -> Option<Vec<u8>> {
        self.get(player).and_then(|store| store.remove(key))
    }

    /// Clears one player's store except the keys in `keep`.
    pub fn clear_player_except<S: AsRef<str>>(&self, player: &str, keep: &[S]) {
        if let Some(store) = self.get(player) {
            store.clear_except(keep);
        }
    }

    /// Clears every player's store except the keys in `keep`.
    pub fn clear_all_except<S: AsRef<str>>(&self, keep: &[S]) {
        let stores: Vec<Arc<StateStore>> = read(&self.players).values().cloned().collect();
        for store in stores {
            store.clear_except(keep);
        }
    }

    /// Removes `key` from every player's store.
    pub fn remove_from_all(&self, key: &str) {
        let stores: Vec<Arc<StateStore>> = read(&self.players).values().cloned().collect();
        for store in stores {
            store.remove(key);
        }
    }

    /// Drops `player`'s store entirely.
    pub fn remove_player(&self, player: &str) -> bool {
        write(&self.players).remove(player).is_some()
    }

    pub fn player_ids(&self) -> Vec<String> {
        read(&self.players).keys().cloned().collect()
    }

    pub fn snapshot(&self) -> HashMap<String, HashMap<String, Vec<u8>>> {
        read(&self.players)
            .iter()
            .map(|(player, store)| (player.clone(), store.entries()))
            .collect()
    }

    pub fn replace_all(&self, players: HashMap<String, HashMap<String, Vec<u8>>>) {
        let stores = players
            .into_iter()
            .map(|(player, states)| (player, Arc::new(StateStore::from_map(states))))
            .collect();
        *write(&self.players) = stores;
    }

    pub fn clear(&self) {
        write(&self.players).clear();
    }
}

/// Full state sent to a newly accepted player in the `Init` packet.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub global: HashMap<String, Vec<u8>>,
    pub players: HashMap<String, HashMap<String, Vec<u8>>>,
}

impl Snapshot {
    pub fn capture(global: &StateStore, players: &PlayerStates) -> Self {
        Self {
            global: global.entries(),
            players: players.snapshot(),
        }
    }

    /// Overwrites both mirrors with the snapshot content.
    pub fn restore(self, global: &StateStore, players: &PlayerStates) {
        global.replace_all(self.global);
        players.replace_all(self.players);
    }
}
