//! Transport contract.
//!
//! The dispatch engines never touch sockets. A transport moves opaque byte
//! buffers between peers and reports what happened on the network as events
//! pushed into a bounded channel. Each engine drains that channel from a single
//! task, so all packet handling for one engine is sequential.
//!
//! Send-side methods are synchronous so they can be called from RPC handlers
//! and state callbacks, which run on the engine task. Implementations are
//! expected to queue rather than block.

use crate::connection::{ConnectionData, ConnectionRequest, DeliveryMode, DisconnectInfo};
use crate::Error;
use std::future::Future;
use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot};

/// Identifies one connected client on the server side.
pub type ConnectionHandle = SocketAddr;

/// Capacity of the transport-to-engine event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
pub enum ServerEvent {
    /// A peer asks to join. The engine decides and sends the request back
    /// through `respond`; the transport completes or refuses the connection.
    ConnectionRequested {
        request: ConnectionRequest,
        respond: oneshot::Sender<ConnectionRequest>,
    },
    /// The transport finished accepting a connection.
    ClientConnected(ConnectionHandle),
    DataReceived(ConnectionHandle, Vec<u8>, DeliveryMode),
    ClientDisconnected(ConnectionHandle, DisconnectInfo),
}

#[derive(Debug)]
pub enum ClientEvent {
    DataReceived(Vec<u8>, DeliveryMode),
    Disconnected(DisconnectInfo),
}

pub trait ServerTransport: Send + Sync + 'static {
    /// Starts listening and returns the bound address.
    fn start(
        &self,
        port: u16,
        events: mpsc::Sender<ServerEvent>,
    ) -> impl Future<Output = Result<SocketAddr, Error>> + Send;

    fn stop(&self);

    /// Closes one connection. The transport reports it back as
    /// [`ServerEvent::ClientDisconnected`].
    fn disconnect(&self, client: ConnectionHandle, reason: &str);

    fn send_to(&self, client: ConnectionHandle, data: Vec<u8>, mode: DeliveryMode);

    /// Sends to every connection the transport currently holds.
    fn broadcast(&self, data: Vec<u8>, mode: DeliveryMode);
}

pub trait ClientTransport: Send + Sync + 'static {
    /// Connects and performs the handshake. Resolves to
    /// [`Error::Rejected`] when the server refuses the connection.
    fn connect(
        &self,
        address: &str,
        port: u16,
        connection_data: ConnectionData,
        events: mpsc::Sender<ClientEvent>,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn disconnect(&self);

    fn send(&self, data: Vec<u8>, mode: DeliveryMode);
}
