//! Tor integration errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors from launching, controlling or building circuits through Tor
#[derive(Debug, Error)]
pub enum TorError {
    /// Malformed circuit path, rejected before anything is registered
    #[error("invalid circuit path: {0}")]
    InvalidPath(String),

    /// Neither the relay pool nor the directory can supply a path
    #[error("no relays available to build a circuit")]
    NoRelays,

    #[error("launch failed: {0}")]
    Launch(#[from] LaunchError),

    /// The daemon exited or errored before reaching 100%
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    /// Error reply from the control port
    #[error("tor control error: {0}")]
    Control(String),

    #[error("tor control connection closed")]
    ConnectionClosed,

    #[error("circuit build abandoned after {0} retries")]
    RetriesExhausted(u32),

    /// The waiter side went away before the circuit was built
    #[error("circuit request cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why the daemon could not be started
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("tor binary not found: {0:?}")]
    BinaryMissing(PathBuf),

    #[error("spawning external processes is not supported on this platform")]
    UnsupportedPlatform,

    #[error("failed to spawn tor: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to prepare tor workspace: {0}")]
    Workspace(#[source] std::io::Error),
}

impl TorError {
    /// Whether this error came from starting the process itself
    pub fn is_launch(&self) -> bool {
        matches!(self, TorError::Launch(_))
    }
}
