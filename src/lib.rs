//! NVMe-over-Fabrics initiator session layer
//!
//! Manages controller sessions to remote NVMe-oF subsystems: connect and
//! teardown, keep-alive scheduling, and admission of block I/O and identify
//! commands onto their queue pairs. The wire transport sits behind the
//! traits in [`transport`].

pub mod attempt;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod initiator;
pub mod keepalive;
pub mod session;
pub mod transport;

pub use config::InitiatorConfig;
pub use error::{NvmfError, NvmfResult};
pub use initiator::{BootDescriptor, Initiator, VersionInfo};
pub use session::{ConnectCommand, SessionKey};
