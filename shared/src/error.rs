use thiserror::Error;

/// Errors surfaced by the protocol layer and the bundled transports.
///
/// Authority violations and routing misses are deliberately not errors: the
/// engines drop or correct those packets without telling the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The server refused the handshake. Carries the human-readable reason.
    #[error("connection rejected: {0}")]
    Rejected(String),

    #[error("timed out waiting for a response")]
    Timeout,

    #[error("not connected")]
    NotConnected,

    #[error("engine is not running")]
    NotRunning,

    #[error("engine is already running")]
    AlreadyRunning,

    /// A global key that looks like it is addressed to a player namespace.
    #[error("invalid state key: {0}")]
    InvalidKey(String),

    #[error("event channel closed")]
    ChannelClosed,
}
