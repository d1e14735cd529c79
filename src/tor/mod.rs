//! Tor daemon interaction
//!
//! Launches and bootstraps the daemon, talks to its ControlPort, and
//! builds circuits on request. Tor itself is treated as a black box.

pub mod attacher;
pub mod bootstrap;
pub mod circuit;
pub mod control;
pub mod directory;
pub mod error;
pub mod launcher;
pub mod protocol;
pub mod service;
pub mod torrc;
pub mod workspace;

pub use attacher::{CircuitAttacher, CircuitBuilder, CircuitListener, CircuitRequest, RetryPolicy};
pub use bootstrap::BootstrapProgress;
pub use circuit::{Circuit, CircuitEvent, CircuitId, RelayId};
pub use control::{ControlSettings, TorController};
pub use directory::RelayDirectory;
pub use error::{LaunchError, TorError};
pub use launcher::{LaunchConfig, ProcessLauncher, TorProcess};
pub use service::{TorService, TorSession};
pub use workspace::{ShutdownHooks, Workspace};
