//! Client dispatch engine: local state mirrors, optimistic writes and RPC calls

use crate::config::ClientConfig;
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::lock::{lock, read, write};
use shared::{
    codec, is_player_id, starts_with_player_id, ClientEvent, ClientTransport, DeliveryMode,
    DisconnectInfo, Error, Packet, PacketKind, PlayerStates, Snapshot, StateStore,
    EVENT_CHANNEL_CAPACITY, PLAYER_ID_LEN, PONG_KEY, TARGET_ALL, TARGET_FORBIDDEN, TARGET_GLOBAL,
    TARGET_OTHERS, TARGET_PLAYERS, TARGET_SELF, TARGET_SERVER,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Called with the packet that changed a watched key.
pub type StateCallback = Arc<dyn Fn(&Packet) + Send + Sync>;

/// RPC handler. Receives the packet target, which is the calling player for
/// `all`/`others` fan-out, and the raw arguments.
pub type RpcHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

type ConnectedCallback = Arc<dyn Fn(&str, &[String]) + Send + Sync>;
type DisconnectedCallback = Arc<dyn Fn(&DisconnectInfo) + Send + Sync>;
type TextCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    connected: Option<ConnectedCallback>,
    disconnected: Option<DisconnectedCallback>,
    player_connected: Option<TextCallback>,
    player_disconnected: Option<TextCallback>,
    kicked: Option<TextCallback>,
    banned: Option<TextCallback>,
}

struct Inner<T> {
    transport: T,
    config: ClientConfig,
    id: RwLock<Option<String>>,
    /// Every connected player, this client included
    players: RwLock<Vec<String>>,
    global: StateStore,
    player_states: PlayerStates,
    watchers: RwLock<HashMap<String, StateCallback>>,
    rpcs: RwLock<HashMap<String, RpcHandler>>,
    callbacks: RwLock<Callbacks>,
    connected: AtomicBool,
    last_pong: Mutex<Option<Instant>>,
}

/// Client side of the protocol
///
/// Keeps mirrors of the server's global and per-player stores. Writes are
/// applied locally first and then sent; the server may answer a refused write
/// with a correction. Cheap to clone; every clone drives the same engine.
pub struct Client<T: ClientTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: ClientTransport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ClientTransport> Client<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                id: RwLock::new(None),
                players: RwLock::new(Vec::new()),
                global: StateStore::new(),
                player_states: PlayerStates::new(),
                watchers: RwLock::new(HashMap::new()),
                rpcs: RwLock::new(HashMap::new()),
                callbacks: RwLock::new(Callbacks::default()),
                connected: AtomicBool::new(false),
                last_pong: Mutex::new(None),
            }),
        }
    }

    /// Connects to `host:port` and spawns the event loop.
    ///
    /// Resolves once the handshake is accepted. The player id arrives shortly
    /// after and is announced through [`Client::on_connected`].
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), Error> {
        if self.is_connected() {
            return Err(Error::AlreadyRunning);
        }

        let connection_data = self.inner.config.connection_data()?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.inner
            .transport
            .connect(host, port, connection_data, events_tx)
            .await?;
        info!("Connected to {}:{}", host, port);

        self.inner.connected.store(true, Ordering::SeqCst);
        let client = self.clone();
        tokio::spawn(async move { client.run(events_rx).await });
        Ok(())
    }

    async fn run(self, mut events: mpsc::Receiver<ClientEvent>) {
        let mut ticker = interval(self.inner.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = ticker.tick() => {}
            }
            if !self.is_connected() {
                break;
            }
        }
        debug!("Client event loop exited");
    }

    /// Leaves the server and clears every mirror. No callback fires.
    pub fn disconnect(&self) {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.transport.disconnect();
        *write(&self.inner.id) = None;
        write(&self.inner.players).clear();
        self.inner.global.clear();
        self.inner.player_states.clear();
        info!("Disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Handles one transport event. The event loop calls this for every event
    /// it receives; custom loops may drive the engine through it directly.
    pub fn handle_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::DataReceived(bytes, _mode) => match Packet::decode(&bytes) {
                Some(packet) => self.handle_packet(packet),
                None => warn!("Failed to decode packet from server"),
            },
            ClientEvent::Disconnected(info) => {
                warn!("Disconnected: {} {}", info.reason, info.message);
                self.inner.connected.store(false, Ordering::SeqCst);
                self.inner.transport.disconnect();
                let callback = read(&self.inner.callbacks).disconnected.clone();
                if let Some(callback) = callback {
                    callback(&info);
                }
            }
        }
    }

    fn handle_packet(&self, packet: Packet) {
        match packet.kind {
            PacketKind::SetState => self.apply_set_state(&packet),
            PacketKind::DeleteState => self.apply_delete_state(&packet),
            PacketKind::Init => match packet.data::<Snapshot>() {
                Some(snapshot) => snapshot.restore(&self.inner.global, &self.inner.player_states),
                None => warn!("Received malformed snapshot"),
            },
            PacketKind::SelfConnected => {
                let roster: Vec<String> = packet.data().unwrap_or_default();
                let Some(id) = roster.first().cloned() else {
                    warn!("Received empty roster");
                    return;
                };
                info!("Joined as {}", id);
                *write(&self.inner.id) = Some(id.clone());
                *write(&self.inner.players) = roster.clone();

                let callback = read(&self.inner.callbacks).connected.clone();
                if let Some(callback) = callback {
                    callback(&id, &roster[1..]);
                }
            }
            PacketKind::PeerConnected => {
                let id = packet.text();
                {
                    let mut players = write(&self.inner.players);
                    if !players.contains(&id) {
                        players.push(id.clone());
                    }
                }
                let callback = read(&self.inner.callbacks).player_connected.clone();
                if let Some(callback) = callback {
                    callback(&id);
                }
            }
            PacketKind::PeerDisconnected => {
                let id = packet.text();
                write(&self.inner.players).retain(|player| player != &id);
                let callback = read(&self.inner.callbacks).player_disconnected.clone();
                if let Some(callback) = callback {
                    callback(&id);
                }
            }
            PacketKind::Rpc => {
                let handler = read(&self.inner.rpcs).get(&packet.key).cloned();
                match handler {
                    Some(handler) => handler(&packet.target, &packet.payload),
                    None => debug!("No RPC registered for {}", packet.key),
                }
            }
            PacketKind::Ping => {
                let own = read(&self.inner.id).as_deref() == Some(packet.target.as_str());
                if packet.target == TARGET_SERVER || own {
                    *lock(&self.inner.last_pong) = Some(Instant::now());
                } else {
                    let pong = Packet::new(PacketKind::Ping, packet.target, PONG_KEY, Vec::new());
                    if let Err(e) = self.send(&pong, DeliveryMode::Unreliable) {
                        error!("Failed to answer ping: {}", e);
                    }
                }
            }
            PacketKind::Kick => {
                let callback = read(&self.inner.callbacks).kicked.clone();
                if let Some(callback) = callback {
                    callback(&packet.text());
                }
            }
            PacketKind::Ban => {
                let callback = read(&self.inner.callbacks).banned.clone();
                if let Some(callback) = callback {
                    callback(&packet.text());
                }
            }
            PacketKind::None => debug!("Ignoring untyped packet"),
        }
    }

    fn apply_set_state(&self, packet: &Packet) {
        if packet.target == TARGET_FORBIDDEN {
            debug!("Server corrected {}", packet.key);
            if packet.payload.is_empty() {
                self.inner.global.remove(&packet.key);
            } else {
                self.inner.global.set(&packet.key, packet.payload.clone());
            }
        } else if is_player_id(&packet.target) {
            // Addressed writes stay in the player namespace even for ids not
            // in the roster yet, or no longer in it
            self.inner
                .player_states
                .set(&packet.target, &packet.key, packet.payload.clone());
        } else {
            let players = read(&self.inner.players).clone();
            let known = |id: &str| players.iter().any(|player| player == id);

            if let Some(owner) = packet
                .key
                .get(..PLAYER_ID_LEN)
                .filter(|owner| known(*owner))
            {
                self.inner.player_states.set(
                    owner,
                    &packet.key[PLAYER_ID_LEN..],
                    packet.payload.clone(),
                );
            } else {
                self.inner.global.set(&packet.key, packet.payload.clone());
            }
        }

        let watcher = read(&self.inner.watchers).get(&packet.key).cloned();
        if let Some(watcher) = watcher {
            watcher(packet);
        }
    }

    fn apply_delete_state(&self, packet: &Packet) {
        let keep: Vec<String> = packet.data().unwrap_or_default();
        match packet.target.as_str() {
            TARGET_GLOBAL if packet.key.is_empty() => self.inner.global.clear_except(&keep),
            TARGET_GLOBAL => {
                self.inner.global.remove(&packet.key);
            }
            TARGET_PLAYERS if packet.key.is_empty() => {
                self.inner.player_states.clear_all_except(&keep)
            }
            TARGET_PLAYERS => self.inner.player_states.remove_from_all(&packet.key),
            target if is_player_id(target) => {
                if packet.key.is_empty() {
                    self.inner.player_states.clear_player_except(target, &keep);
                } else {
                    self.inner.player_states.remove(target, &packet.key);
                }
            }
            other => debug!("Ignoring delete with unknown target {:?}", other),
        }
    }

    fn send(&self, packet: &Packet, mode: DeliveryMode) -> Result<(), Error> {
        self.inner.transport.send(packet.encode()?, mode);
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), Error> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn own_id(&self) -> Result<String, Error> {
        self.ensure_connected()?;
        read(&self.inner.id).clone().ok_or(Error::NotConnected)
    }

    /// Writes a global state locally and sends it to the server.
    ///
    /// Keys starting with a player id are refused; they would be read back
    /// as belonging to that player's namespace.
    pub fn set_state(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        if starts_with_player_id(key) {
            return Err(Error::InvalidKey(key.to_string()));
        }
        self.ensure_connected()?;
        self.inner.global.set(key, value.clone());
        self.send(
            &Packet::new(PacketKind::SetState, "", key, value),
            DeliveryMode::ReliableUnordered,
        )
    }

    pub fn set_state_as<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> Result<(), Error> {
        self.set_state(key, codec::encode(value)?)
    }

    /// Writes a state in this client's own namespace and sends it to the server.
    pub fn set_player_state(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        let id = self.own_id()?;
        self.inner.player_states.set(&id, key, value.clone());
        self.send(
            &Packet::new(PacketKind::SetState, id, key, value),
            DeliveryMode::ReliableUnordered,
        )
    }

    pub fn set_player_state_as<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
    ) -> Result<(), Error> {
        self.set_player_state(key, codec::encode(value)?)
    }

    pub fn delete_state(&self, key: &str) -> Result<(), Error> {
        self.ensure_connected()?;
        self.inner.global.remove(key);
        self.send(
            &Packet::new(PacketKind::DeleteState, TARGET_GLOBAL, key, Vec::new()),
            DeliveryMode::ReliableOrdered,
        )
    }

    /// Clears every global key not in `keep`. The server keeps reserved keys
    /// unless this client is an admin.
    pub fn clear_states_except(&self, keep: &[String]) -> Result<(), Error> {
        self.ensure_connected()?;
        self.inner.global.clear_except(keep);
        self.send(
            &Packet::with_data(PacketKind::DeleteState, TARGET_GLOBAL, "", keep)?,
            DeliveryMode::ReliableOrdered,
        )
    }

    pub fn delete_player_state(&self, key: &str) -> Result<(), Error> {
        let id = self.own_id()?;
        self.inner.player_states.remove(&id, key);
        self.send(
            &Packet::new(PacketKind::DeleteState, id, key, Vec::new()),
            DeliveryMode::ReliableOrdered,
        )
    }

    pub fn clear_player_states_except(&self, keep: &[String]) -> Result<(), Error> {
        let id = self.own_id()?;
        self.inner.player_states.clear_player_except(&id, keep);
        self.send(
            &Packet::with_data(PacketKind::DeleteState, id, "", keep)?,
            DeliveryMode::ReliableOrdered,
        )
    }

    fn rpc(&self, target: &str, method: &str, args: Vec<u8>) -> Result<(), Error> {
        self.ensure_connected()?;
        self.send(
            &Packet::new(PacketKind::Rpc, target, method, args),
            DeliveryMode::ReliableOrdered,
        )
    }

    /// Calls `method` on this client, routed through the server.
    pub fn rpc_self(&self, method: &str, args: Vec<u8>) -> Result<(), Error> {
        self.rpc(TARGET_SELF, method, args)
    }

    pub fn rpc_player(&self, player: &str, method: &str, args: Vec<u8>) -> Result<(), Error> {
        self.rpc(player, method, args)
    }

    /// Calls `method` on every player, this client included.
    pub fn rpc_all(&self, method: &str, args: Vec<u8>) -> Result<(), Error> {
        self.rpc(TARGET_ALL, method, args)
    }

    pub fn rpc_others(&self, method: &str, args: Vec<u8>) -> Result<(), Error> {
        self.rpc(TARGET_OTHERS, method, args)
    }

    /// Calls a handler registered on the server.
    pub fn rpc_server(&self, method: &str, args: Vec<u8>) -> Result<(), Error> {
        self.rpc(TARGET_SERVER, method, args)
    }

    /// Measures the round trip to the server.
    ///
    /// Only one ping may be outstanding at a time.
    pub async fn ping_server(&self, timeout: Duration) -> Result<Duration, Error> {
        self.ping(TARGET_SERVER, timeout).await
    }

    /// Measures the round trip to another player through the server.
    pub async fn ping_player(&self, player: &str, timeout: Duration) -> Result<Duration, Error> {
        self.ping(player, timeout).await
    }

    async fn ping(&self, target: &str, timeout: Duration) -> Result<Duration, Error> {
        self.ensure_connected()?;
        *lock(&self.inner.last_pong) = None;

        let started = Instant::now();
        self.send(
            &Packet::new(PacketKind::Ping, target, "", Vec::new()),
            DeliveryMode::Unreliable,
        )?;

        let mut ticker = interval(self.inner.config.poll_interval);
        loop {
            ticker.tick().await;
            let pong = lock(&self.inner.last_pong).take();
            if let Some(pong) = pong {
                return Ok(pong.saturating_duration_since(started));
            }
            if started.elapsed() >= timeout {
                return Err(Error::Timeout);
            }
        }
    }

    pub fn get_state(&self, key: &str) -> Vec<u8> {
        self.inner.global.get(key)
    }

    pub fn get_state_as<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        self.inner.global.get_as(key)
    }

    pub fn get_player_state(&self, player: &str, key: &str) -> Vec<u8> {
        self.inner.player_states.get_value(player, key)
    }

    pub fn get_player_state_as<V: DeserializeOwned>(&self, player: &str, key: &str) -> Option<V> {
        codec::decode_or_none(&self.get_player_state(player, key))
    }

    pub fn global_states(&self) -> &StateStore {
        &self.inner.global
    }

    pub fn player_states(&self) -> &PlayerStates {
        &self.inner.player_states
    }

    /// This client's player id, once the server has assigned it.
    pub fn id(&self) -> Option<String> {
        read(&self.inner.id).clone()
    }

    /// Every connected player, this client included.
    pub fn players(&self) -> Vec<String> {
        read(&self.inner.players).clone()
    }

    /// Watches one state key. Replaces any previous watcher for that key.
    pub fn on<F>(&self, key: impl Into<String>, callback: F)
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        write(&self.inner.watchers).insert(key.into(), Arc::new(callback));
    }

    pub fn off(&self, key: &str) {
        write(&self.inner.watchers).remove(key);
    }

    pub fn register_rpc<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        write(&self.inner.rpcs).insert(method.into(), Arc::new(handler));
    }

    /// Fires with this client's id and the ids of every other player.
    pub fn on_connected<F>(&self, callback: F)
    where
        F: Fn(&str, &[String]) + Send + Sync + 'static,
    {
        write(&self.inner.callbacks).connected = Some(Arc::new(callback));
    }

    /// Fires when the transport loses the connection.
    pub fn on_disconnected<F>(&self, callback: F)
    where
        F: Fn(&DisconnectInfo) + Send + Sync + 'static,
    {
        write(&self.inner.callbacks).disconnected = Some(Arc::new(callback));
    }

    pub fn on_player_connected<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        write(&self.inner.callbacks).player_connected = Some(Arc::new(callback));
    }

    pub fn on_player_disconnected<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        write(&self.inner.callbacks).player_disconnected = Some(Arc::new(callback));
    }

    pub fn on_kicked<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        write(&self.inner.callbacks).kicked = Some(Arc::new(callback));
    }

    pub fn on_banned<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        write(&self.inner.callbacks).banned = Some(Arc::new(callback));
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{generate_player_id, ConnectionData};

    /// Transport double that records sent packets and answers server pings.
    #[derive(Default)]
    struct MockTransport {
        sent: Mutex<Vec<Packet>>,
        events: Mutex<Option<mpsc::Sender<ClientEvent>>>,
        handshake: Mutex<Option<ConnectionData>>,
        disconnects: Mutex<usize>,
        reject: Option<String>,
    }

    impl MockTransport {
        fn rejecting(reason: &str) -> Self {
            Self {
                reject: Some(reason.to_string()),
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<Packet> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl ClientTransport for MockTransport {
        async fn connect(
            &self,
            _address: &str,
            _port: u16,
            connection_data: ConnectionData,
            events: mpsc::Sender<ClientEvent>,
        ) -> Result<(), Error> {
            if let Some(reason) = &self.reject {
                return Err(Error::Rejected(reason.clone()));
            }
            *self.handshake.lock().unwrap() = Some(connection_data);
            *self.events.lock().unwrap() = Some(events);
            Ok(())
        }

        fn disconnect(&self) {
            *self.disconnects.lock().unwrap() += 1;
            self.events.lock().unwrap().take();
        }

        fn send(&self, data: Vec<u8>, mode: DeliveryMode) {
            let packet = Packet::decode(&data).unwrap();
            if packet.kind == PacketKind::Ping && packet.target == TARGET_SERVER {
                if let Some(events) = self.events.lock().unwrap().as_ref() {
                    let _ = events.try_send(ClientEvent::DataReceived(data.clone(), mode));
                }
            }
            self.sent.lock().unwrap().push(packet);
        }
    }

    fn receive(client: &Client<MockTransport>, packet: Packet) {
        client.handle_event(ClientEvent::DataReceived(
            packet.encode().unwrap(),
            DeliveryMode::ReliableOrdered,
        ));
    }

    /// Connects and delivers the roster, returning (own id, other ids).
    async fn joined_client(others: usize) -> (Client<MockTransport>, String, Vec<String>) {
        let client = Client::new(MockTransport::default(), ClientConfig::default());
        client.connect("127.0.0.1", 9050).await.unwrap();

        let id = generate_player_id();
        let others: Vec<String> = (0..others).map(|_| generate_player_id()).collect();
        let mut roster = vec![id.clone()];
        roster.extend(others.iter().cloned());
        receive(
            &client,
            Packet::with_data(PacketKind::SelfConnected, "", "Connected", &roster).unwrap(),
        );
        (client, id, others)
    }

    #[tokio::test]
    async fn test_connect_sends_init_states() {
        let config = ClientConfig::new()
            .with_init_state("score", vec![42])
            .with_player_init_state("name", b"alice".to_vec());
        let client = Client::new(MockTransport::default(), config);
        client.connect("127.0.0.1", 9050).await.unwrap();

        let data = client.transport().handshake.lock().unwrap().clone().unwrap();
        let states = data.states().unwrap();
        assert_eq!(states.get("score"), Some(&vec![42]));
        assert_eq!(states.get("[player]name"), Some(&b"alice".to_vec()));
        assert!(matches!(
            client.connect("127.0.0.1", 9050).await,
            Err(Error::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn test_rejected_connect() {
        let client = Client::new(
            MockTransport::rejecting("Server is full"),
            ClientConfig::default(),
        );
        match client.connect("127.0.0.1", 9050).await {
            Err(Error::Rejected(reason)) => assert_eq!(reason, "Server is full"),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_self_connected_records_roster() {
        let client = Client::new(MockTransport::default(), ClientConfig::default());
        let announced = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&announced);
        client.on_connected(move |id, others| {
            *seen.lock().unwrap() = Some((id.to_string(), others.to_vec()));
        });
        client.connect("127.0.0.1", 9050).await.unwrap();

        let id = generate_player_id();
        let other = generate_player_id();
        receive(
            &client,
            Packet::with_data(
                PacketKind::SelfConnected,
                "",
                "Connected",
                &vec![id.clone(), other.clone()],
            )
            .unwrap(),
        );

        assert_eq!(client.id(), Some(id.clone()));
        assert_eq!(client.players(), vec![id.clone(), other.clone()]);
        assert_eq!(*announced.lock().unwrap(), Some((id, vec![other])));
    }

    #[tokio::test]
    async fn test_peer_roster_updates() {
        let (client, _id, _) = joined_client(0).await;
        let joined = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&joined);
        client.on_player_connected(move |id| seen.lock().unwrap().push(id.to_string()));

        let peer = generate_player_id();
        receive(
            &client,
            Packet::new(PacketKind::PeerConnected, "", "Connected", peer.clone().into_bytes()),
        );
        assert!(client.players().contains(&peer));
        assert_eq!(*joined.lock().unwrap(), vec![peer.clone()]);

        receive(
            &client,
            Packet::new(PacketKind::PeerDisconnected, "", "Disconnected", peer.clone().into_bytes()),
        );
        assert!(!client.players().contains(&peer));
    }

    #[tokio::test]
    async fn test_set_state_resolves_namespaces() {
        let (client, _id, others) = joined_client(1).await;
        let other = &others[0];

        receive(&client, Packet::new(PacketKind::SetState, "", "score", vec![42]));
        receive(&client, Packet::new(PacketKind::SetState, other.as_str(), "hp", vec![7]));
        let prefixed = format!("{}mana", other);
        receive(&client, Packet::new(PacketKind::SetState, "", prefixed.as_str(), vec![3]));
        let stranger = format!("{}mana", generate_player_id());
        receive(&client, Packet::new(PacketKind::SetState, "", stranger.as_str(), vec![4]));

        assert_eq!(client.get_state("score"), vec![42]);
        assert_eq!(client.get_player_state(other, "hp"), vec![7]);
        assert_eq!(client.get_player_state(other, "mana"), vec![3]);
        assert_eq!(client.get_state(&stranger), vec![4]);
    }

    #[tokio::test]
    async fn test_write_for_unknown_player_stays_in_player_namespace() {
        let (client, _, _) = joined_client(0).await;
        receive(&client, Packet::new(PacketKind::SetState, "", "hp", vec![100]));

        let departed = generate_player_id();
        receive(&client, Packet::new(PacketKind::SetState, departed.as_str(), "hp", vec![1]));

        assert_eq!(client.get_state("hp"), vec![100]);
        assert_eq!(client.get_player_state(&departed, "hp"), vec![1]);
    }

    #[tokio::test]
    async fn test_forbidden_correction() {
        let (client, _, _) = joined_client(0).await;
        client.set_state("round", vec![99]).unwrap();

        receive(&client, Packet::new(PacketKind::SetState, TARGET_FORBIDDEN, "round", vec![3]));
        assert_eq!(client.get_state("round"), vec![3]);

        client.set_state("fresh", vec![1]).unwrap();
        receive(&client, Packet::new(PacketKind::SetState, TARGET_FORBIDDEN, "fresh", Vec::new()));
        assert!(!client.global_states().contains_key("fresh"));
    }

    #[tokio::test]
    async fn test_refused_delete_is_restored() {
        let (client, _, _) = joined_client(0).await;
        receive(&client, Packet::new(PacketKind::SetState, "", "round", vec![3]));

        client.delete_state("round").unwrap();
        assert!(client.get_state("round").is_empty());

        receive(&client, Packet::new(PacketKind::SetState, TARGET_FORBIDDEN, "round", vec![3]));
        assert_eq!(client.get_state("round"), vec![3]);
    }

    #[tokio::test]
    async fn test_watcher_fires_on_exact_key() {
        let (client, _, _) = joined_client(0).await;
        let hits = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&hits);
        client.on("score", move |packet| seen.lock().unwrap().push(packet.payload.clone()));

        receive(&client, Packet::new(PacketKind::SetState, "", "score", vec![1]));
        receive(&client, Packet::new(PacketKind::SetState, "", "other", vec![2]));
        client.off("score");
        receive(&client, Packet::new(PacketKind::SetState, "", "score", vec![3]));

        assert_eq!(*hits.lock().unwrap(), vec![vec![1]]);
    }

    #[tokio::test]
    async fn test_set_state_rejects_player_prefixed_key() {
        let (client, _, _) = joined_client(0).await;
        let key = format!("{}hp", generate_player_id());
        assert!(matches!(client.set_state(&key, vec![1]), Err(Error::InvalidKey(_))));
        assert!(client.transport().sent().is_empty());
    }

    #[tokio::test]
    async fn test_writes_are_optimistic() {
        let (client, id, _) = joined_client(0).await;
        client.set_state("score", vec![5]).unwrap();
        client.set_player_state("hp", vec![9]).unwrap();

        assert_eq!(client.get_state("score"), vec![5]);
        assert_eq!(client.get_player_state(&id, "hp"), vec![9]);
        assert_eq!(
            client.transport().sent(),
            vec![
                Packet::new(PacketKind::SetState, "", "score", vec![5]),
                Packet::new(PacketKind::SetState, id.as_str(), "hp", vec![9]),
            ]
        );
    }

    #[tokio::test]
    async fn test_calls_fail_when_disconnected() {
        let client = Client::new(MockTransport::default(), ClientConfig::default());
        assert!(matches!(client.set_state("a", vec![1]), Err(Error::NotConnected)));
        assert!(matches!(client.set_player_state("a", vec![1]), Err(Error::NotConnected)));
        assert!(matches!(client.rpc_all("m", Vec::new()), Err(Error::NotConnected)));
        assert!(matches!(
            client.ping_server(Duration::from_millis(50)).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_rpc_targets() {
        let (client, _, others) = joined_client(1).await;
        client.rpc_self("a", vec![1]).unwrap();
        client.rpc_player(&others[0], "b", vec![2]).unwrap();
        client.rpc_all("c", vec![3]).unwrap();
        client.rpc_others("d", vec![4]).unwrap();
        client.rpc_server("e", vec![5]).unwrap();

        let targets: Vec<String> = client
            .transport()
            .sent()
            .into_iter()
            .map(|packet| packet.target)
            .collect();
        assert_eq!(
            targets,
            vec!["self".to_string(), others[0].clone(), "all".into(), "others".into(), "server".into()]
        );
    }

    #[tokio::test]
    async fn test_rpc_handler_receives_sender() {
        let (client, _, others) = joined_client(1).await;
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        client.register_rpc("wave", move |sender, args| {
            seen.lock().unwrap().push((sender.to_string(), args.to_vec()));
        });

        receive(&client, Packet::new(PacketKind::Rpc, others[0].as_str(), "wave", vec![1]));
        receive(&client, Packet::new(PacketKind::Rpc, "server", "unknown", vec![2]));

        assert_eq!(*calls.lock().unwrap(), vec![(others[0].clone(), vec![1])]);
    }

    #[tokio::test]
    async fn test_ping_server_measures_round_trip() {
        let (client, _, _) = joined_client(0).await;
        let rtt = client.ping_server(Duration::from_secs(2)).await.unwrap();
        assert!(rtt < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_ping_player_times_out() {
        let (client, _, others) = joined_client(1).await;
        let result = client
            .ping_player(&others[0], Duration::from_millis(60))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn test_relayed_ping_is_answered() {
        let (client, id, others) = joined_client(1).await;

        receive(&client, Packet::new(PacketKind::Ping, others[0].as_str(), "", Vec::new()));
        assert_eq!(
            client.transport().sent(),
            vec![Packet::new(PacketKind::Ping, others[0].as_str(), PONG_KEY, Vec::new())]
        );

        receive(&client, Packet::new(PacketKind::Ping, id.as_str(), PONG_KEY, Vec::new()));
        assert!(lock(&client.inner.last_pong).is_some());
    }

    #[tokio::test]
    async fn test_init_replaces_mirrors() {
        let (client, _, others) = joined_client(1).await;
        client.set_state("stale", vec![0]).unwrap();

        let mut snapshot = Snapshot::default();
        snapshot.global.insert("score".to_string(), vec![42]);
        snapshot
            .players
            .entry(others[0].clone())
            .or_default()
            .insert("hp".to_string(), vec![5]);
        receive(
            &client,
            Packet::with_data(PacketKind::Init, "", "Init", &snapshot).unwrap(),
        );

        assert_eq!(client.get_state("score"), vec![42]);
        assert!(client.get_state("stale").is_empty());
        assert_eq!(client.get_player_state(&others[0], "hp"), vec![5]);
    }

    #[tokio::test]
    async fn test_delete_state_addressing() {
        let (client, id, _) = joined_client(0).await;
        client.set_state("a", vec![1]).unwrap();
        client.set_state("b", vec![2]).unwrap();
        client.set_player_state("hp", vec![3]).unwrap();
        client.set_player_state("mp", vec![4]).unwrap();

        receive(
            &client,
            Packet::with_data(PacketKind::DeleteState, TARGET_GLOBAL, "", &vec!["b"]).unwrap(),
        );
        receive(&client, Packet::new(PacketKind::DeleteState, id.as_str(), "hp", Vec::new()));

        assert!(client.get_state("a").is_empty());
        assert_eq!(client.get_state("b"), vec![2]);
        assert!(client.get_player_state(&id, "hp").is_empty());
        assert_eq!(client.get_player_state(&id, "mp"), vec![4]);

        receive(&client, Packet::new(PacketKind::DeleteState, TARGET_PLAYERS, "", Vec::new()));
        assert!(client.get_player_state(&id, "mp").is_empty());
    }

    #[tokio::test]
    async fn test_kick_and_transport_disconnect() {
        let (client, _, _) = joined_client(0).await;
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let kicked = Arc::clone(&reasons);
        client.on_kicked(move |reason| kicked.lock().unwrap().push(reason.to_string()));
        let dropped = Arc::clone(&reasons);
        client.on_disconnected(move |info| dropped.lock().unwrap().push(info.reason.clone()));

        client.set_state("score", vec![1]).unwrap();
        receive(&client, Packet::new(PacketKind::Kick, "", "Kicked", b"spam".to_vec()));
        client.handle_event(ClientEvent::Disconnected(DisconnectInfo::new("Kicked: spam", "")));

        assert!(!client.is_connected());
        assert_eq!(
            *reasons.lock().unwrap(),
            vec!["spam".to_string(), "Kicked: spam".to_string()]
        );
        // Mirrors survive a transport-side disconnect
        assert_eq!(client.get_state("score"), vec![1]);
    }

    #[tokio::test]
    async fn test_disconnect_clears_everything() {
        let (client, _, _) = joined_client(1).await;
        client.set_state("score", vec![1]).unwrap();

        client.disconnect();
        client.disconnect();

        assert!(!client.is_connected());
        assert_eq!(client.id(), None);
        assert!(client.players().is_empty());
        assert!(client.global_states().is_empty());
        assert_eq!(*client.transport().disconnects.lock().unwrap(), 1);
    }
}
