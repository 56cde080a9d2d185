//! RPC fan-out policy.
//!
//! Decides who receives a routed RPC packet. It never looks at the payload
//! and never resolves method names; the engine does both.

use shared::{ConnectionHandle, RpcMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Send the packet to these connections.
    Deliver(Vec<ConnectionHandle>),
    /// Invoke a handler registered on the server.
    Local,
}

/// Resolves the recipients for `mode`.
///
/// `addressed` is the connection the mode is relative to: the recipient for
/// `Target` and `Host`, the excluded connection for `Others`.
pub fn route(
    mode: RpcMode,
    addressed: Option<ConnectionHandle>,
    connections: &[ConnectionHandle],
) -> Route {
    match mode {
        RpcMode::Target | RpcMode::Host => Route::Deliver(addressed.into_iter().collect()),
        RpcMode::Others => Route::Deliver(
            connections
                .iter()
                .copied()
                .filter(|handle| Some(*handle) != addressed)
                .collect(),
        ),
        RpcMode::All => Route::Deliver(connections.to_vec()),
        RpcMode::Server => Route::Local,
    }
}
