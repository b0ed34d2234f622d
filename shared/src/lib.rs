//! NVMe-oF Initiator Shared Types
//!
//! This crate provides the persisted record types, the packed record codec
//! and the session lifecycle state machine shared by the initiator layer.

pub mod codec;
pub mod records;
pub mod state_machine;

// Re-export commonly used types at crate root
pub use records::*;

/// Fixed capacities of the persisted and command text fields, in bytes
pub mod limits {
    /// Attempt name
    pub const ATTEMPT_NAME_LEN: usize = 12;

    /// Transport type string ("tcp", "rdma")
    pub const TRANSPORT_TYPE_LEN: usize = 8;

    /// Textual IPv4/IPv6 address (INET6_ADDRSTRLEN)
    pub const IP_TEXT_LEN: usize = 46;

    /// Generic fixed text field of a connect command
    pub const TEXT_FIELD_LEN: usize = 224;

    /// Subsystem and host NQN
    pub const NQN_LEN: usize = 224;

    /// Target address (IP literal or DNS name)
    pub const TARGET_ADDRESS_LEN: usize = 224;

    /// Security key / credential path
    pub const KEY_PATH_LEN: usize = 224;

    /// MAC address text ("aa:bb:cc:dd:ee:ff" plus NUL)
    pub const MAC_TEXT_LEN: usize = 18;

    /// Upper bound for the per-attempt connect retry count
    pub const MAX_RETRY_COUNT: u8 = 16;

    /// Connect timeout bounds (ms)
    pub const MIN_CONNECT_TIMEOUT_MS: u16 = 100;
    pub const MAX_CONNECT_TIMEOUT_MS: u16 = 60000;
}

/// Protocol defaults for sessions
pub mod timing {
    /// Default connect timeout in milliseconds
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u16 = 10000;

    /// Default connect retry count
    pub const DEFAULT_RETRY_COUNT: u8 = 3;

    /// Default keep-alive timeout advertised to the target (KATO)
    pub const DEFAULT_KEEP_ALIVE_TIMEOUT_MS: u64 = 10000;

    /// Logical block size used for transfer-length checks
    pub const BLOCK_SIZE: u64 = 512;
}

/// NVMe-oF revision this layer speaks
pub const NVMF_REVISION: (u16, u8, u8) = (1, 1, 0);

/// Prefix of host NQNs synthesized from a host UUID
pub const HOST_NQN_UUID_PREFIX: &str = "nqn.2014-08.org.nvmexpress:uuid:";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout_within_bounds() {
        assert!(timing::DEFAULT_CONNECT_TIMEOUT_MS >= limits::MIN_CONNECT_TIMEOUT_MS);
        assert!(timing::DEFAULT_CONNECT_TIMEOUT_MS <= limits::MAX_CONNECT_TIMEOUT_MS);
        assert!(timing::DEFAULT_RETRY_COUNT <= limits::MAX_RETRY_COUNT);
    }
}
