//! # State Replication Client Library
//!
//! This library provides the client side of the state replication protocol.
//! It keeps local mirrors of the server's global and per-player key/value
//! stores, exposes an API to write and delete state, and sends and receives
//! remote procedure calls.
//!
//! ## Architecture Overview
//!
//! ### Optimistic Writes
//! Every write is applied to the local mirror before it leaves the machine,
//! so reads see the new value immediately. The server is authoritative: a
//! write it refuses is answered with a correction that overwrites the mirror
//! with the server's value.
//!
//! ### Namespaces
//! Player-scoped values arrive either addressed to a player id or with the id
//! prefixed to the key. The client resolves both forms against the roster it
//! learns on join, so keys that merely look like ids stay global.
//!
//! ### Event Loop
//! Like the server, the client drains transport events from one task. State
//! watchers, RPC handlers and lifecycle callbacks run on that task.
//!
//! ## Module Organization
//!
//! ### Configuration Module (`config`)
//! Poll interval, protocol key and the states seeded on join.
//!
//! ### Network Module (`network`)
//! The client dispatch engine:
//! - Handshake and roster tracking
//! - Inbound packet handling and state mirrors
//! - Outbound state writes, deletes, RPCs and pings
//!
//! ### Transport Module (`transport`)
//! The bundled UDP transport with heartbeats and timeout detection.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::network::Client;
//! use client::transport::UdpClientTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new().with_player_init_state("name", b"alice".to_vec());
//!     let client = Client::new(UdpClientTransport::new(), config);
//!
//!     client.on("score", |packet| println!("score is now {:?}", packet.payload));
//!     client.register_rpc("wave", |sender, _args| println!("{} waved", sender));
//!
//!     client.connect("127.0.0.1", 9050).await?;
//!     client.set_state("score", vec![1])?;
//!     client.rpc_others("wave", Vec::new())?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod network;
pub mod transport;
