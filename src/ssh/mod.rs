//! Remote engine access over SSH.

pub mod manager;
pub mod tunnel;

pub use manager::{SshAuth, SshError, SshManager, SshTarget};
pub use tunnel::DockerTunnel;
