//! Session management for connected NVMe-oF controllers
//!
//! This module handles:
//! - Validating connect commands and resolving host identity
//! - The fabric handshake with retries and rollback
//! - The ordered registry of live sessions and their keys
//! - Per-queue-pair command tracking

mod connect;
mod connection;
mod key;
mod manager;
mod queue;
mod registry;

pub use connect::{ConnectCommand, ConnectPlan, IP_MODE_V4, IP_MODE_V6};
pub use connection::{ControllerSession, KeepAliveTimer, NamespaceGeometry, SessionSummary};
pub use key::{SessionKey, KEY_PROBES, SESSION_KEY_LEN};
pub use manager::SessionManager;
pub use queue::{CommandTracker, RequestId};
pub use registry::{ConnectionRegistry, InsertError};
