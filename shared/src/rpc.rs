use crate::packet::{TARGET_ALL, TARGET_OTHERS, TARGET_SELF, TARGET_SERVER};
use serde::{Deserialize, Serialize};

/// Fan-out policy for a routed RPC packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcMode {
    /// Exactly one addressed player.
    Target,
    /// Every player except the addressed one.
    Others,
    /// Every player.
    All,
    /// Back to the connection that sent it.
    Host,
    /// A handler registered on the server.
    Server,
}

impl RpcMode {
    /// Resolves an RPC target keyword. Player ids are not keywords and yield `None`.
    pub fn from_keyword(target: &str) -> Option<Self> {
        match target {
            TARGET_SELF => Some(Self::Host),
            TARGET_ALL => Some(Self::All),
            TARGET_OTHERS => Some(Self::Others),
            TARGET_SERVER => Some(Self::Server),
            _ => None,
        }
    }

    /// Keyword a client puts in `target` to request this mode.
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            Self::Target => None,
            Self::Host => Some(TARGET_SELF),
            Self::All => Some(TARGET_ALL),
            Self::Others => Some(TARGET_OTHERS),
            Self::Server => Some(TARGET_SERVER),
        }
    }
}
