//! UDP implementation of the client transport

use log::{debug, info, warn};
use shared::frame::{Frame, CONNECT_TIMEOUT, HEARTBEAT_INTERVAL, MAX_DATAGRAM_SIZE, PEER_TIMEOUT};
use shared::lock::lock;
use shared::{ClientEvent, ClientTransport, ConnectionData, DeliveryMode, DisconnectInfo, Error};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, timeout_at, Instant};

/// How long to wait for an answer before repeating the connect frame
const CONNECT_RETRY: Duration = Duration::from_millis(500);

struct Connection {
    socket: Arc<UdpSocket>,
    tasks: Vec<JoinHandle<()>>,
}

/// Talks to a server over a connected UDP socket
///
/// After the handshake a receiver task forwards payloads to the engine and
/// watches for server silence, while a second task sends heartbeats.
#[derive(Default)]
pub struct UdpClientTransport {
    connection: Mutex<Option<Connection>>,
}

impl UdpClientTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local address of the socket while connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.connection)
            .as_ref()
            .and_then(|connection| connection.socket.local_addr().ok())
    }
}

impl ClientTransport for UdpClientTransport {
    async fn connect(
        &self,
        address: &str,
        port: u16,
        connection_data: ConnectionData,
        events: mpsc::Sender<ClientEvent>,
    ) -> Result<(), Error> {
        if lock(&self.connection).is_some() {
            return Err(Error::AlreadyRunning);
        }

        let server = lookup_host((address, port)).await?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("could not resolve {}:{}", address, port),
            )
        })?;
        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        debug!("Connecting to {} from {}", server, socket.local_addr()?);

        let connect = Frame::Connect {
            connection_data: connection_data.encode()?,
        }
        .encode()?;
        let early = match timeout(CONNECT_TIMEOUT, handshake(&socket, &connect)).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout),
        };
        info!("Handshake with {} accepted", server);

        // Anything the server sent ahead of the acceptance goes first
        for (mode, data) in early {
            events
                .send(ClientEvent::DataReceived(data, mode))
                .await
                .map_err(|_| Error::ChannelClosed)?;
        }

        let socket = Arc::new(socket);
        let receiver = tokio::spawn(receive_loop(Arc::clone(&socket), events));
        let heartbeat = tokio::spawn(heartbeat_loop(Arc::clone(&socket)));

        *lock(&self.connection) = Some(Connection {
            socket,
            tasks: vec![receiver, heartbeat],
        });
        Ok(())
    }

    fn disconnect(&self) {
        let Some(connection) = lock(&self.connection).take() else {
            return;
        };
        for task in &connection.tasks {
            task.abort();
        }
        let goodbye = Frame::Disconnect {
            reason: "Client disconnected".to_string(),
        };
        if let Ok(bytes) = goodbye.encode() {
            if let Err(e) = connection.socket.try_send(&bytes) {
                debug!("Failed to send disconnect frame: {}", e);
            }
        }
    }

    fn send(&self, data: Vec<u8>, mode: DeliveryMode) {
        let guard = lock(&self.connection);
        let Some(connection) = guard.as_ref() else {
            debug!("Dropping outgoing packet, not connected");
            return;
        };
        match (Frame::Payload { mode, data }).encode() {
            Ok(bytes) => {
                if let Err(e) = connection.socket.try_send(&bytes) {
                    warn!("Failed to send packet: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode frame: {}", e),
        }
    }
}

/// Sends the connect frame until the server decides
///
/// Returns payloads that overtook the acceptance on the wire.
async fn handshake(
    socket: &UdpSocket,
    connect: &[u8],
) -> Result<Vec<(DeliveryMode, Vec<u8>)>, Error> {
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut early = Vec::new();

    loop {
        socket.send(connect).await?;

        let len = match timeout(CONNECT_RETRY, socket.recv(&mut buffer)).await {
            Ok(received) => received?,
            Err(_) => {
                debug!("No answer yet, repeating connect");
                continue;
            }
        };

        match Frame::decode(&buffer[..len]) {
            Some(Frame::Accepted) => return Ok(early),
            Some(Frame::Rejected { reason }) => return Err(Error::Rejected(reason)),
            Some(Frame::Payload { mode, data }) => early.push((mode, data)),
            Some(other) => debug!("Ignoring {:?} during handshake", other),
            None => warn!("Failed to decode frame during handshake"),
        }
    }
}

/// Forwards server traffic to the engine until the link goes away
async fn receive_loop(socket: Arc<UdpSocket>, events: mpsc::Sender<ClientEvent>) {
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut last_seen = Instant::now();

    loop {
        let len = match timeout_at(last_seen + PEER_TIMEOUT, socket.recv(&mut buffer)).await {
            Ok(Ok(len)) => len,
            Ok(Err(e)) => {
                // A refused port shows up here once the server is gone
                debug!("Error receiving datagram: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
            Err(_) => {
                warn!("Server timed out");
                let info = DisconnectInfo::new("Timeout", "Server stopped responding");
                let _ = events.send(ClientEvent::Disconnected(info)).await;
                break;
            }
        };
        last_seen = Instant::now();

        match Frame::decode(&buffer[..len]) {
            Some(Frame::Payload { mode, data }) => {
                if events
                    .send(ClientEvent::DataReceived(data, mode))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Some(Frame::Disconnect { reason }) | Some(Frame::Rejected { reason }) => {
                info!("Server closed the connection: {}", reason);
                let _ = events
                    .send(ClientEvent::Disconnected(DisconnectInfo::new(reason, "")))
                    .await;
                break;
            }
            Some(Frame::Heartbeat) | Some(Frame::Accepted) => {}
            Some(Frame::Connect { .. }) => debug!("Ignoring server-bound frame"),
            None => warn!("Failed to decode frame from server"),
        }
    }
}

async fn heartbeat_loop(socket: Arc<UdpSocket>) {
    let Ok(heartbeat) = Frame::Heartbeat.encode() else {
        return;
    };
    let mut ticker = interval(HEARTBEAT_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = socket.send(&heartbeat).await {
            debug!("Failed to send heartbeat: {}", e);
        }
    }
}
