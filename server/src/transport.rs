//! UDP implementation of the server transport

use crate::peers::PeerTable;
use log::{debug, error, info, warn};
use shared::frame::{Frame, HEARTBEAT_INTERVAL, MAX_DATAGRAM_SIZE, PEER_TIMEOUT};
use shared::lock::lock;
use shared::{
    ConnectionData, ConnectionHandle, ConnectionRequest, DeliveryMode, DisconnectInfo, Error,
    ServerEvent, ServerTransport,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

/// Work queued for the sender task
#[derive(Debug)]
enum Outgoing {
    Frame(SocketAddr, Frame),
    Broadcast(Frame),
    Disconnect(SocketAddr, String),
    Shutdown,
}

struct Running {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    tasks: Vec<JoinHandle<()>>,
}

/// Serves clients over a single UDP socket
///
/// Three tasks share the socket: a receiver turning datagrams into engine
/// events, a sender draining the outgoing queue, and a timeout checker that
/// also keeps peers alive with heartbeats.
pub struct UdpServerTransport {
    host: String,
    running: Mutex<Option<Running>>,
}

impl UdpServerTransport {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            running: Mutex::new(None),
        }
    }

    fn enqueue(&self, message: Outgoing) {
        match lock(&self.running).as_ref() {
            Some(running) => {
                if let Err(e) = running.outgoing.send(message) {
                    error!("Failed to queue outgoing frame: {}", e);
                }
            }
            None => debug!("Dropping outgoing frame, transport is not running"),
        }
    }
}

impl ServerTransport for UdpServerTransport {
    async fn start(
        &self,
        port: u16,
        events: mpsc::Sender<ServerEvent>,
    ) -> Result<SocketAddr, Error> {
        if lock(&self.running).is_some() {
            return Err(Error::AlreadyRunning);
        }

        let socket = Arc::new(UdpSocket::bind((self.host.as_str(), port)).await?);
        let addr = socket.local_addr()?;
        info!("UDP transport bound to {}", addr);

        let peers = Arc::new(RwLock::new(PeerTable::new()));
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        let receiver = tokio::spawn(receive_loop(
            Arc::clone(&socket),
            Arc::clone(&peers),
            events.clone(),
            outgoing_tx.clone(),
        ));
        tokio::spawn(send_loop(
            Arc::clone(&socket),
            Arc::clone(&peers),
            outgoing_rx,
            events.clone(),
        ));
        let checker = tokio::spawn(timeout_loop(peers, events, outgoing_tx.clone()));

        *lock(&self.running) = Some(Running {
            outgoing: outgoing_tx,
            tasks: vec![receiver, checker],
        });
        Ok(addr)
    }

    fn stop(&self) {
        let Some(running) = lock(&self.running).take() else {
            return;
        };
        for task in &running.tasks {
            task.abort();
        }
        // The sender task says goodbye to every peer and exits.
        let _ = running.outgoing.send(Outgoing::Shutdown);
    }

    fn disconnect(&self, client: ConnectionHandle, reason: &str) {
        self.enqueue(Outgoing::Disconnect(client, reason.to_string()));
    }

    fn send_to(&self, client: ConnectionHandle, data: Vec<u8>, mode: DeliveryMode) {
        self.enqueue(Outgoing::Frame(client, Frame::Payload { mode, data }));
    }

    fn broadcast(&self, data: Vec<u8>, mode: DeliveryMode) {
        self.enqueue(Outgoing::Broadcast(Frame::Payload { mode, data }));
    }
}

/// Continuously listens for incoming datagrams
async fn receive_loop(
    socket: Arc<UdpSocket>,
    peers: Arc<RwLock<PeerTable>>,
    events: mpsc::Sender<ServerEvent>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
) {
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, addr) = match socket.recv_from(&mut buffer).await {
            Ok(received) => received,
            Err(e) => {
                // ICMP errors from departed peers surface here on some platforms
                debug!("Error receiving datagram: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };

        let Some(frame) = Frame::decode(&buffer[..len]) else {
            warn!("Failed to decode frame from {}", addr);
            continue;
        };

        let delivered = match frame {
            Frame::Connect { connection_data } => {
                if peers.read().await.contains(addr) {
                    let _ = outgoing.send(Outgoing::Frame(addr, Frame::Accepted));
                    continue;
                }
                let data = ConnectionData::decode(&connection_data).unwrap_or_default();
                request_connection(addr, data, &peers, &events, &outgoing).await
            }
            Frame::Payload { mode, data } => {
                if peers.write().await.touch(addr) {
                    events
                        .send(ServerEvent::DataReceived(addr, data, mode))
                        .await
                        .is_ok()
                } else {
                    debug!("Ignoring payload from unknown peer {}", addr);
                    true
                }
            }
            Frame::Heartbeat => {
                peers.write().await.touch(addr);
                true
            }
            Frame::Disconnect { reason } => {
                if peers.write().await.remove(addr) {
                    let info = DisconnectInfo::new("Disconnected", reason);
                    events
                        .send(ServerEvent::ClientDisconnected(addr, info))
                        .await
                        .is_ok()
                } else {
                    true
                }
            }
            Frame::Accepted | Frame::Rejected { .. } => {
                debug!("Ignoring client-bound frame from {}", addr);
                true
            }
        };

        if !delivered {
            info!("Engine went away, stopping receiver");
            break;
        }
    }
}

/// Hands a connection request to the engine and answers the peer once it is decided
///
/// The decision is awaited on its own task so a slow engine does not stall
/// the receiver. An accepted peer is registered and announced to the engine
/// before `Accepted` goes out, so its first payload can never overtake the
/// connect event.
async fn request_connection(
    addr: SocketAddr,
    data: ConnectionData,
    peers: &Arc<RwLock<PeerTable>>,
    events: &mpsc::Sender<ServerEvent>,
    outgoing: &mpsc::UnboundedSender<Outgoing>,
) -> bool {
    let (respond, decided) = oneshot::channel();
    let request = ConnectionRequest::new(addr, data);
    if events
        .send(ServerEvent::ConnectionRequested { request, respond })
        .await
        .is_err()
    {
        return false;
    }

    let peers = Arc::clone(peers);
    let events = events.clone();
    let outgoing = outgoing.clone();
    tokio::spawn(async move {
        let request = match decided.await {
            Ok(request) => request,
            Err(_) => {
                debug!("Connection request from {} was never decided", addr);
                return;
            }
        };

        if !request.accepted() {
            let reason = request.rejection_message().to_string();
            let _ = outgoing.send(Outgoing::Frame(addr, Frame::Rejected { reason }));
            return;
        }

        if peers.write().await.add(addr)
            && events.send(ServerEvent::ClientConnected(addr)).await.is_err()
        {
            return;
        }
        let _ = outgoing.send(Outgoing::Frame(addr, Frame::Accepted));
    });
    true
}

/// Processes the outgoing frame queue
async fn send_loop(
    socket: Arc<UdpSocket>,
    peers: Arc<RwLock<PeerTable>>,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::Sender<ServerEvent>,
) {
    while let Some(message) = outgoing.recv().await {
        match message {
            Outgoing::Frame(addr, frame) => send_frame(&socket, &frame, addr).await,
            Outgoing::Broadcast(frame) => {
                let addrs = peers.read().await.addrs();
                for addr in addrs {
                    send_frame(&socket, &frame, addr).await;
                }
            }
            Outgoing::Disconnect(addr, reason) => {
                let frame = Frame::Disconnect {
                    reason: reason.clone(),
                };
                send_frame(&socket, &frame, addr).await;
                if peers.write().await.remove(addr) {
                    let info = DisconnectInfo::new(reason, "");
                    let _ = events
                        .send(ServerEvent::ClientDisconnected(addr, info))
                        .await;
                }
            }
            Outgoing::Shutdown => {
                let frame = Frame::Disconnect {
                    reason: "Server stopped".to_string(),
                };
                let addrs = peers.read().await.addrs();
                for addr in addrs {
                    send_frame(&socket, &frame, addr).await;
                }
                peers.write().await.clear();
                break;
            }
        }
    }
    debug!("UDP sender exited");
}

/// Drops silent peers and keeps live ones from timing out on their side
async fn timeout_loop(
    peers: Arc<RwLock<PeerTable>>,
    events: mpsc::Sender<ServerEvent>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
) {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);

    loop {
        interval.tick().await;

        let timed_out = peers.write().await.check_timeouts(PEER_TIMEOUT);
        for addr in timed_out {
            info!("Peer {} timed out", addr);
            let info = DisconnectInfo::new("Timed out", "");
            if events
                .send(ServerEvent::ClientDisconnected(addr, info))
                .await
                .is_err()
            {
                return;
            }
        }

        if outgoing.send(Outgoing::Broadcast(Frame::Heartbeat)).is_err() {
            return;
        }
    }
}

async fn send_frame(socket: &UdpSocket, frame: &Frame, addr: SocketAddr) {
    let bytes = match frame.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to encode frame for {}: {}", addr, e);
            return;
        }
    };
    if bytes.len() > MAX_DATAGRAM_SIZE {
        warn!("Dropping {} byte frame for {}: too large", bytes.len(), addr);
        return;
    }
    if let Err(e) = socket.send_to(&bytes, addr).await {
        error!("Failed to send frame to {}: {}", addr, e);
    }
}
