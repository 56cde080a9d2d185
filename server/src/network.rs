//! Server dispatch engine: handshake decisions, state authority and packet routing

use crate::config::ServerConfig;
use crate::handshake;
use crate::registry::PlayerRegistry;
use crate::router::{route, Route};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::lock::{read, write};
use shared::{
    codec, is_player_id, starts_with_player_id, ConnectionHandle, DeliveryMode, Error, Packet,
    PacketKind, PlayerStates, RpcMode, ServerEvent, ServerTransport, Snapshot, StateStore,
    EVENT_CHANNEL_CAPACITY, PONG_KEY, TARGET_FORBIDDEN, TARGET_GLOBAL, TARGET_PLAYERS,
    TARGET_SERVER,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Handler for RPCs addressed to the server. Receives the calling connection
/// (None when invoked locally through [`Server::rpc_self`]) and the raw arguments.
pub type RpcHandler = Arc<dyn Fn(Option<ConnectionHandle>, &[u8]) + Send + Sync>;

/// Runs on every decoded packet before dispatch. Returning None drops the packet.
pub type PacketInterceptor = Arc<dyn Fn(ConnectionHandle, Packet) -> Option<Packet> + Send + Sync>;

struct Inner<T> {
    transport: T,
    config: ServerConfig,
    registry: RwLock<PlayerRegistry>,
    global: StateStore,
    player_states: PlayerStates,
    rpcs: RwLock<HashMap<String, RpcHandler>>,
    interceptor: RwLock<Option<PacketInterceptor>>,
    running: AtomicBool,
    stopped: AtomicBool,
}

/// Authoritative server
///
/// Cheap to clone; every clone drives the same engine. Transport events are
/// handled one at a time on the task spawned by [`Server::start`], while the
/// public API may be called from anywhere.
pub struct Server<T: ServerTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: ServerTransport> Clone for Server<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ServerTransport> Server<T> {
    pub fn new(transport: T, config: ServerConfig) -> Self {
        let registry = PlayerRegistry::new(config.banned.clone());
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                registry: RwLock::new(registry),
                global: StateStore::new(),
                player_states: PlayerStates::new(),
                rpcs: RwLock::new(HashMap::new()),
                interceptor: RwLock::new(None),
                running: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Starts the transport on `port` and spawns the event loop.
    ///
    /// Returns the address the transport is bound to.
    pub async fn start(&self, port: u16) -> Result<SocketAddr, Error> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(Error::NotRunning);
        }
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let addr = match self.inner.transport.start(port, events_tx).await {
            Ok(addr) => addr,
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        info!("Server listening on {}", addr);

        let server = self.clone();
        tokio::spawn(async move { server.run(events_rx).await });
        Ok(addr)
    }

    /// Drains transport events until the server is stopped or the transport
    /// drops its end of the channel.
    async fn run(self, mut events: mpsc::Receiver<ServerEvent>) {
        let mut ticker = interval(self.inner.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("Transport closed the event channel");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !self.is_running() {
                        break;
                    }
                }
            }
        }
        debug!("Server event loop exited");
    }

    /// Stops the transport and forgets every player and state.
    ///
    /// Calls made after this are no-ops.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.transport.stop();
        write(&self.inner.registry).clear();
        self.inner.global.clear();
        self.inner.player_states.clear();
        info!("Server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Handles one transport event. The event loop calls this for every event
    /// it receives; custom loops may drive the engine through it directly.
    pub fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::ConnectionRequested {
                mut request,
                respond,
            } => {
                if self.is_stopped() {
                    request.reject("Server is stopped");
                } else {
                    let mut registry = write(&self.inner.registry);
                    handshake::evaluate(
                        &self.inner.config,
                        &mut registry,
                        &self.inner.global,
                        &mut request,
                    );
                }
                if respond.send(request).is_err() {
                    debug!("Transport dropped a pending connection request");
                }
            }
            ServerEvent::ClientConnected(handle) => self.admit(handle),
            ServerEvent::DataReceived(handle, bytes, _mode) => self.handle_data(handle, bytes),
            ServerEvent::ClientDisconnected(handle, info) => {
                let removed = write(&self.inner.registry).remove_by_handle(handle);
                if let Some(id) = removed {
                    info!("Player {} left ({})", id, info.reason);
                    let packet = Packet::new(
                        PacketKind::PeerDisconnected,
                        "",
                        "Disconnected",
                        id.into_bytes(),
                    );
                    self.send_all(&packet, DeliveryMode::ReliableOrdered, Some(handle));
                }
            }
        }
    }

    fn admit(&self, handle: ConnectionHandle) {
        if self.is_stopped() {
            return;
        }
        let admission = {
            let mut registry = write(&self.inner.registry);
            handshake::admit(
                &self.inner.config,
                &mut registry,
                &self.inner.player_states,
                handle,
            )
        };

        let joined = Packet::new(
            PacketKind::PeerConnected,
            "",
            "Connected",
            admission.id.clone().into_bytes(),
        );
        for previous in &admission.previous {
            self.send_packet(*previous, &joined, DeliveryMode::ReliableOrdered);
        }

        match Packet::with_data(PacketKind::SelfConnected, "", "Connected", &admission.roster) {
            Ok(packet) => self.send_packet(handle, &packet, DeliveryMode::ReliableOrdered),
            Err(e) => error!("Failed to encode roster for {}: {}", admission.id, e),
        }

        let snapshot = Snapshot::capture(&self.inner.global, &self.inner.player_states);
        match Packet::with_data(PacketKind::Init, "", "Init", &snapshot) {
            Ok(packet) => self.send_packet(handle, &packet, DeliveryMode::ReliableOrdered),
            Err(e) => error!("Failed to encode snapshot for {}: {}", admission.id, e),
        }
    }

    fn handle_data(&self, handle: ConnectionHandle, bytes: Vec<u8>) {
        let Some(packet) = Packet::decode(&bytes) else {
            warn!("Failed to decode packet from {}", handle);
            return;
        };
        let Some(origin) = self.player_id(handle) else {
            debug!("Dropping packet from unregistered connection {}", handle);
            return;
        };

        let interceptor = read(&self.inner.interceptor).clone();
        let packet = match interceptor {
            Some(intercept) => match intercept(handle, packet) {
                Some(packet) => packet,
                None => return,
            },
            None => packet,
        };

        match packet.kind {
            PacketKind::SetState => self.handle_set_state(handle, &origin, packet),
            PacketKind::DeleteState => self.handle_delete_state(handle, &origin, packet),
            PacketKind::Rpc => self.handle_rpc(handle, &origin, packet),
            PacketKind::Ping => self.handle_ping(handle, &origin, packet),
            other => debug!("Ignoring {:?} packet from {}", other, origin),
        }
    }

    fn handle_set_state(&self, handle: ConnectionHandle, origin: &str, packet: Packet) {
        if packet.is_player_scoped() {
            if packet.target != origin {
                debug!("{} tried to write state owned by {}", origin, packet.target);
                return;
            }
            self.inner
                .player_states
                .set(&packet.target, &packet.key, packet.payload.clone());
            self.send_all(&packet, DeliveryMode::ReliableUnordered, Some(handle));
            return;
        }

        if starts_with_player_id(&packet.key) {
            debug!("Dropping global write to player-looking key {}", packet.key);
            return;
        }

        if self.inner.config.is_reserved(&packet.key) && !self.is_admin(origin) {
            info!("Rejected write to reserved key {} from {}", packet.key, origin);
            self.send_correction(handle, &packet.key);
            return;
        }

        self.inner.global.set(&packet.key, packet.payload.clone());
        self.send_all(
            &packet.retarget(""),
            DeliveryMode::ReliableUnordered,
            Some(handle),
        );
    }

    fn handle_delete_state(&self, handle: ConnectionHandle, origin: &str, packet: Packet) {
        let admin = self.is_admin(origin);
        let keep: Vec<String> = packet.data().unwrap_or_default();

        match packet.target.as_str() {
            TARGET_GLOBAL => {
                if packet.key.is_empty() {
                    let mut keep = keep;
                    let mut protected = Vec::new();
                    if !admin {
                        for reserved in &self.inner.config.reserved_keys {
                            if !keep.contains(reserved) {
                                keep.push(reserved.clone());
                                protected.push(reserved.clone());
                            }
                        }
                    }
                    self.inner.global.clear_except(&keep);
                    self.broadcast_keep_list(TARGET_GLOBAL, &keep, Some(handle));
                    // The sender already cleared these from its mirror
                    for key in &protected {
                        if self.inner.global.contains_key(key) {
                            self.send_correction(handle, key);
                        }
                    }
                } else {
                    if self.inner.config.is_reserved(&packet.key) && !admin {
                        debug!("{} tried to delete reserved key {}", origin, packet.key);
                        self.send_correction(handle, &packet.key);
                        return;
                    }
                    self.inner.global.remove(&packet.key);
                    self.send_all(&packet, DeliveryMode::ReliableOrdered, Some(handle));
                }
            }
            TARGET_PLAYERS => {
                if !admin {
                    debug!("{} tried to clear every player's state", origin);
                    return;
                }
                if packet.key.is_empty() {
                    self.inner.player_states.clear_all_except(&keep);
                } else {
                    self.inner.player_states.remove_from_all(&packet.key);
                }
                self.send_all(&packet, DeliveryMode::ReliableOrdered, Some(handle));
            }
            target if is_player_id(target) => {
                if target != origin && !admin {
                    debug!("{} tried to delete state owned by {}", origin, target);
                    return;
                }
                if packet.key.is_empty() {
                    self.inner.player_states.clear_player_except(target, &keep);
                } else {
                    self.inner.player_states.remove(target, &packet.key);
                }
                self.send_all(&packet, DeliveryMode::ReliableOrdered, Some(handle));
            }
            other => debug!("Dropping delete with unknown target {:?}", other),
        }
    }

    fn handle_rpc(&self, handle: ConnectionHandle, origin: &str, packet: Packet) {
        let (mode, addressed) = {
            let registry = read(&self.inner.registry);
            match registry.handle_of(&packet.target) {
                Some(recipient) => (RpcMode::Target, Some(recipient)),
                None => match RpcMode::from_keyword(&packet.target) {
                    Some(mode) => (mode, Some(handle)),
                    None => {
                        debug!("Dropping RPC {} to unknown target {}", packet.key, packet.target);
                        return;
                    }
                },
            }
        };

        let connections = read(&self.inner.registry).handles();
        match route(mode, addressed, &connections) {
            Route::Deliver(recipients) => {
                let outgoing = match mode {
                    RpcMode::All | RpcMode::Others => packet.retarget(origin),
                    _ => packet,
                };
                match outgoing.encode() {
                    Ok(bytes) => {
                        for recipient in recipients {
                            self.inner.transport.send_to(
                                recipient,
                                bytes.clone(),
                                DeliveryMode::ReliableOrdered,
                            );
                        }
                    }
                    Err(e) => error!("Failed to encode RPC {}: {}", outgoing.key, e),
                }
            }
            Route::Local => self.invoke_rpc(&packet.key, Some(handle), &packet.payload),
        }
    }

    fn handle_ping(&self, handle: ConnectionHandle, origin: &str, packet: Packet) {
        if packet.target == TARGET_SERVER {
            self.send_packet(handle, &packet, DeliveryMode::Unreliable);
            return;
        }

        let Some(recipient) = self.player_handle(&packet.target) else {
            debug!("Dropping ping to unknown player {}", packet.target);
            return;
        };
        if packet.key == PONG_KEY {
            self.send_packet(recipient, &packet, DeliveryMode::Unreliable);
        } else {
            self.send_packet(recipient, &packet.retarget(origin), DeliveryMode::Unreliable);
        }
    }

    fn invoke_rpc(&self, method: &str, caller: Option<ConnectionHandle>, args: &[u8]) {
        let handler = read(&self.inner.rpcs).get(method).cloned();
        match handler {
            Some(handler) => handler(caller, args),
            None => debug!("No server RPC registered for {}", method),
        }
    }

    /// Restores the server's value of `key` in the mirror behind `handle`.
    /// An empty payload tells the client the key does not exist.
    fn send_correction(&self, handle: ConnectionHandle, key: &str) {
        let correction = Packet::new(
            PacketKind::SetState,
            TARGET_FORBIDDEN,
            key,
            self.inner.global.get(key),
        );
        self.send_packet(handle, &correction, DeliveryMode::ReliableOrdered);
    }

    fn broadcast_keep_list(&self, target: &str, keep: &[String], except: Option<ConnectionHandle>) {
        match Packet::with_data(PacketKind::DeleteState, target, "", keep) {
            Ok(packet) => self.send_all(&packet, DeliveryMode::ReliableOrdered, except),
            Err(e) => error!("Failed to encode keep list: {}", e),
        }
    }

    fn send_packet(&self, handle: ConnectionHandle, packet: &Packet, mode: DeliveryMode) {
        match packet.encode() {
            Ok(bytes) => self.inner.transport.send_to(handle, bytes, mode),
            Err(e) => error!("Failed to encode packet for {}: {}", handle, e),
        }
    }

    /// Sends `packet` to every registered player except `except`.
    pub fn send_all(&self, packet: &Packet, mode: DeliveryMode, except: Option<ConnectionHandle>) {
        let bytes = match packet.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode packet: {}", e);
                return;
            }
        };
        let handles = read(&self.inner.registry).handles();
        for handle in handles {
            if Some(handle) != except {
                self.inner.transport.send_to(handle, bytes.clone(), mode);
            }
        }
    }

    /// Installs the hook that sees every inbound packet before dispatch.
    pub fn on_packet<F>(&self, interceptor: F)
    where
        F: Fn(ConnectionHandle, Packet) -> Option<Packet> + Send + Sync + 'static,
    {
        *write(&self.inner.interceptor) = Some(Arc::new(interceptor));
    }

    pub fn register_rpc<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<ConnectionHandle>, &[u8]) + Send + Sync + 'static,
    {
        write(&self.inner.rpcs).insert(method.into(), Arc::new(handler));
    }

    /// Invokes a server RPC handler locally.
    pub fn rpc_self(&self, method: &str, args: &[u8]) {
        if self.is_stopped() {
            return;
        }
        self.invoke_rpc(method, None, args);
    }

    /// Calls `method` on one player.
    pub fn rpc_player(&self, id: &str, method: &str, args: Vec<u8>) {
        if self.is_stopped() {
            return;
        }
        let Some(handle) = self.player_handle(id) else {
            debug!("Cannot call {} on unknown player {}", method, id);
            return;
        };
        let packet = Packet::new(PacketKind::Rpc, TARGET_SERVER, method, args);
        self.send_packet(handle, &packet, DeliveryMode::ReliableOrdered);
    }

    /// Calls `method` on every player.
    pub fn rpc_all(&self, method: &str, args: Vec<u8>) {
        if self.is_stopped() {
            return;
        }
        let packet = Packet::new(PacketKind::Rpc, TARGET_SERVER, method, args);
        self.send_all(&packet, DeliveryMode::ReliableOrdered, None);
    }

    /// Sends `Kick` to the player and closes its connection.
    pub fn kick(&self, id: &str, reason: &str) {
        let Some(handle) = self.player_handle(id) else {
            return;
        };
        info!("Kicking {}: {}", id, reason);
        let packet = Packet::new(PacketKind::Kick, "", "Kicked", reason.as_bytes().to_vec());
        self.send_packet(handle, &packet, DeliveryMode::ReliableOrdered);
        self.inner
            .transport
            .disconnect(handle, &format!("Kicked: {}", reason));
    }

    /// Bans the player's IP address, then sends `Ban` and closes its connection.
    pub fn ban(&self, id: &str, reason: &str) {
        let Some(handle) = self.player_handle(id) else {
            return;
        };
        write(&self.inner.registry).ban(handle.ip().to_string());
        let packet = Packet::new(PacketKind::Ban, "", "Banned", reason.as_bytes().to_vec());
        self.send_packet(handle, &packet, DeliveryMode::ReliableOrdered);
        self.inner
            .transport
            .disconnect(handle, &format!("Banned: {}", reason));
    }

    pub fn set_state(&self, key: &str, value: Vec<u8>) {
        if self.is_stopped() {
            return;
        }
        self.inner.global.set(key, value.clone());
        let packet = Packet::new(PacketKind::SetState, "", key, value);
        self.send_all(&packet, DeliveryMode::ReliableUnordered, None);
    }

    pub fn set_state_as<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> Result<(), Error> {
        self.set_state(key, codec::encode(value)?);
        Ok(())
    }

    pub fn set_player_state(&self, id: &str, key: &str, value: Vec<u8>) {
        if self.is_stopped() {
            return;
        }
        self.inner.player_states.set(id, key, value.clone());
        let packet = Packet::new(PacketKind::SetState, id, key, value);
        self.send_all(&packet, DeliveryMode::ReliableUnordered, None);
    }

    pub fn set_player_state_as<V: Serialize + ?Sized>(
        &self,
        id: &str,
        key: &str,
        value: &V,
    ) -> Result<(), Error> {
        self.set_player_state(id, key, codec::encode(value)?);
        Ok(())
    }

    /// Deletes one global key everywhere.
    pub fn delete_state(&self, key: &str) {
        if self.is_stopped() {
            return;
        }
        self.inner.global.remove(key);
        let packet = Packet::new(PacketKind::DeleteState, TARGET_GLOBAL, key, Vec::new());
        self.send_all(&packet, DeliveryMode::ReliableOrdered, None);
    }

    /// Clears every global key not listed in `keep`, everywhere.
    pub fn clear_global_states_except<S: AsRef<str>>(&self, keep: &[S]) {
        if self.is_stopped() {
            return;
        }
        let keep: Vec<String> = keep.iter().map(|k| k.as_ref().to_string()).collect();
        self.inner.global.clear_except(&keep);
        self.broadcast_keep_list(TARGET_GLOBAL, &keep, None);
    }

    /// Clears every listed global key, everywhere.
    pub fn clear_global_states_including<S: AsRef<str>>(&self, keys: &[S]) {
        if self.is_stopped() {
            return;
        }
        self.inner.global.clear_including(keys);
        for key in keys {
            let packet =
                Packet::new(PacketKind::DeleteState, TARGET_GLOBAL, key.as_ref(), Vec::new());
            self.send_all(&packet, DeliveryMode::ReliableOrdered, None);
        }
    }

    pub fn delete_player_state(&self, id: &str, key: &str) {
        if self.is_stopped() {
            return;
        }
        self.inner.player_states.remove(id, key);
        let packet = Packet::new(PacketKind::DeleteState, id, key, Vec::new());
        self.send_all(&packet, DeliveryMode::ReliableOrdered, None);
    }

    pub fn clear_player_states_except<S: AsRef<str>>(&self, id: &str, keep: &[S]) {
        if self.is_stopped() {
            return;
        }
        let keep: Vec<String> = keep.iter().map(|k| k.as_ref().to_string()).collect();
        self.inner.player_states.clear_player_except(id, &keep);
        self.broadcast_keep_list(id, &keep, None);
    }

    pub fn clear_all_player_states_except<S: AsRef<str>>(&self, keep: &[S]) {
        if self.is_stopped() {
            return;
        }
        let keep: Vec<String> = keep.iter().map(|k| k.as_ref().to_string()).collect();
        self.inner.player_states.clear_all_except(&keep);
        self.broadcast_keep_list(TARGET_PLAYERS, &keep, None);
    }

    pub fn get_state(&self, key: &str) -> Vec<u8> {
        self.inner.global.get(key)
    }

    pub fn get_state_as<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        self.inner.global.get_as(key)
    }

    pub fn get_player_state(&self, id: &str, key: &str) -> Vec<u8> {
        self.inner.player_states.get_value(id, key)
    }

    pub fn global_states(&self) -> &StateStore {
        &self.inner.global
    }

    pub fn player_states(&self) -> &PlayerStates {
        &self.inner.player_states
    }

    /// Connected players by id.
    pub fn players(&self) -> HashMap<String, ConnectionHandle> {
        read(&self.inner.registry).players()
    }

    pub fn player_count(&self) -> usize {
        read(&self.inner.registry).len()
    }

    pub fn admins(&self) -> Vec<String> {
        read(&self.inner.registry).admins()
    }

    pub fn banned(&self) -> Vec<String> {
        read(&self.inner.registry).banned()
    }

    pub fn is_admin(&self, id: &str) -> bool {
        read(&self.inner.registry).is_admin(id)
    }

    pub fn player_id(&self, handle: ConnectionHandle) -> Option<String> {
        read(&self.inner.registry).find_id_by_handle(handle)
    }

    pub fn player_handle(&self, id: &str) -> Option<ConnectionHandle> {
        read(&self.inner.registry).handle_of(id)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }
}
