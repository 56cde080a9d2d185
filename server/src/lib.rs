//! # State Replication Server Library
//!
//! This library provides the authoritative server for the state replication
//! protocol. It owns the canonical global and per-player key/value stores,
//! decides who may join, enforces who may write what, and routes remote
//! procedure calls between players.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! Clients write optimistically and the server has the final word. A write to
//! another player's namespace is ignored; a write to a reserved global key by
//! a non-admin is refused and answered with a correction carrying the current
//! value, so the writer's mirror converges back.
//!
//! ### Connection Lifecycle
//! Handles the complete lifecycle of a player:
//! - Handshake decisions (capacity, ban list, protocol key)
//! - Seeding of global and player-scoped state supplied at connect time
//! - Player id assignment and the initial roster and snapshot
//! - Disconnect notifications, kicks and IP bans
//!
//! ### RPC Routing
//! Fans RPC packets out to one player, every player, every player but the
//! sender, back to the sender, or to handlers registered on the server itself.
//!
//! ## Architecture Design
//!
//! ### Single-Consumer Event Loop
//! The transport pushes network events into a bounded channel drained by one
//! task. All packet handling for a server is therefore sequential, while the
//! public API may be called from any thread; shared maps sit behind locks.
//!
//! ### Pluggable Transport
//! The engine only depends on [`shared::ServerTransport`]. The bundled
//! [`transport::UdpServerTransport`] frames packets over a single UDP socket
//! with heartbeats and timeouts, but any transport honouring the contract
//! works.
//!
//! ## Module Organization
//!
//! ### Configuration Module (`config`)
//! Builder-style server settings: capacity, admin mode, bans, reserved keys.
//!
//! ### Registry Module (`registry`)
//! Player ids, connection handles, admins, bans and pending seed states.
//!
//! ### Handshake Module (`handshake`)
//! Connection request evaluation and player admission.
//!
//! ### Router Module (`router`)
//! Pure RPC fan-out policy.
//!
//! ### Network Module (`network`)
//! The dispatch engine tying everything together.
//!
//! ### Peers and Transport Modules (`peers`, `transport`)
//! The UDP transport and its per-endpoint health tracking.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::transport::UdpServerTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new()
//!         .with_max_players(8)
//!         .with_reserved_states(vec!["round".to_string()]);
//!     let server = Server::new(UdpServerTransport::new("0.0.0.0"), config);
//!
//!     server.register_rpc("restart", |caller, _args| {
//!         println!("restart requested by {:?}", caller);
//!     });
//!
//!     server.start(9050).await?;
//!     server.set_state("round", vec![1]);
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod handshake;
pub mod network;
pub mod peers;
pub mod registry;
pub mod router;
pub mod transport;
