//! Transport trait abstraction for pluggable fabric backends
//!
//! A `FabricConnector` performs the connect handshake and yields an owned
//! `FabricController`. The controller owns its admin queue pair and hands
//! out owned I/O queue pairs. Handles are released explicitly, exactly once.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::command::{CommandId, Completion, NvmeCommand};

/// Fabric failures reported by a transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportFailure {
    #[error("Target unreachable: {0}")]
    Unreachable(String),

    #[error("Connect rejected by target: {0}")]
    Rejected(String),

    #[error("Queue pair failure: {0}")]
    QueueFailed(String),
}

/// Errors from submitting onto a queue pair
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Queue pair has no free slot")]
    QueueFull,

    #[error(transparent)]
    Transport(#[from] TransportFailure),
}

/// Supported fabric transport types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Tcp,
    Rdma,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "rdma" => Ok(TransportKind::Rdma),
            other => Err(format!("unsupported transport type {:?}", other)),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Rdma => write!(f, "rdma"),
        }
    }
}

/// Static local addressing for the host side of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBinding {
    pub address: IpAddr,
    pub subnet_mask: IpAddr,
    pub gateway: Option<IpAddr>,
}

/// Validated parameters handed to the fabric handshake
#[derive(Debug, Clone)]
pub struct HandshakeParams {
    pub transport: TransportKind,
    pub target: SocketAddr,
    pub subsystem_nqn: String,
    pub host_nqn: String,
    pub host_id: Uuid,
    pub keep_alive_timeout_ms: u64,
    /// None when the local address comes from DHCP
    pub local: Option<LocalBinding>,
    pub mac: Option<String>,
}

/// Factory for fabric associations
#[async_trait]
pub trait FabricConnector: Send + Sync {
    /// Establish an admin queue with the remote target
    async fn connect(
        &self,
        params: &HandshakeParams,
    ) -> Result<Box<dyn FabricController>, TransportFailure>;

    /// Whether this connector can carry the given transport type
    fn supports(&self, kind: TransportKind) -> bool;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

/// Owned handle to a connected remote controller
pub trait FabricController: Send {
    /// Controller id assigned by the target
    fn controller_id(&self) -> u16;

    /// Number of namespaces reported at connect time
    fn namespace_count(&self) -> u32;

    /// Admin queue pair, owned by the controller
    fn admin_queue(&mut self) -> &mut dyn QueuePair;

    /// Create an I/O queue pair of the given depth
    fn create_io_queue(&mut self, depth: u16) -> Result<Box<dyn QueuePair>, TransportFailure>;

    /// Controller-level reset; existing I/O queue pairs become unusable
    fn reset(&mut self) -> Result<(), TransportFailure>;

    /// Tear down the association
    fn release(self: Box<Self>);
}

/// Submission/completion channel to a controller
pub trait QueuePair: Send {
    /// Submit a command, returning the command id it was assigned
    fn submit(&mut self, command: NvmeCommand) -> Result<CommandId, SubmitError>;

    /// Reap completions that are ready (`max == 0` means no limit)
    fn process_completions(&mut self, max: usize) -> Result<Vec<Completion>, TransportFailure>;

    /// Commands submitted but not yet reaped
    fn outstanding(&self) -> usize;

    /// Delete the queue pair
    fn release(self: Box<Self>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_parsing() {
        assert_eq!("tcp".parse::<TransportKind>(), Ok(TransportKind::Tcp));
        assert_eq!("RDMA".parse::<TransportKind>(), Ok(TransportKind::Rdma));
        assert!("fc".parse::<TransportKind>().is_err());
        assert_eq!(TransportKind::Tcp.to_string(), "tcp");
    }
}
