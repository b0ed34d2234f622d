//! Runtime configuration for the initiator

use std::path::PathBuf;
use std::time::Duration;

use nvmf_shared::timing;

/// Configuration for the initiator layer
#[derive(Debug, Clone)]
pub struct InitiatorConfig {
    /// Maximum number of concurrently registered sessions
    pub max_sessions: usize,
    /// Keep-alive timeout advertised to targets; keep-alives go out at half of it
    pub keep_alive_timeout_ms: u64,
    /// Synchronous read/write timeout
    pub io_timeout_ms: u64,
    /// Synchronous identify timeout
    pub admin_timeout_ms: u64,
    /// Depth requested for each I/O queue pair
    pub io_queue_depth: u16,
    /// Delay between connect handshake retries
    pub connect_retry_delay: Duration,
    /// Period of the cooperative poll loop in the binary
    pub poll_interval: Duration,
    /// Directory backing the variable store
    pub store_dir: PathBuf,
}

impl Default for InitiatorConfig {
    fn default() -> Self {
        Self {
            max_sessions: 16,
            keep_alive_timeout_ms: timing::DEFAULT_KEEP_ALIVE_TIMEOUT_MS,
            io_timeout_ms: 30000,
            admin_timeout_ms: 5000,
            io_queue_depth: 32,
            connect_retry_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            store_dir: PathBuf::from("/var/lib/nvmf-initiator"),
        }
    }
}

impl InitiatorConfig {
    /// Defaults overlaid with `NVMF_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("NVMF_STORE_DIR") {
            config.store_dir = PathBuf::from(dir);
        }
        if let Some(max) = env_number("NVMF_MAX_SESSIONS") {
            config.max_sessions = max as usize;
        }
        if let Some(ms) = env_number("NVMF_IO_TIMEOUT_MS") {
            config.io_timeout_ms = ms;
        }
        if let Some(ms) = env_number("NVMF_KEEP_ALIVE_TIMEOUT_MS") {
            config.keep_alive_timeout_ms = ms;
        }

        config
    }

    /// Interval between keep-alives, in ticks (ms)
    pub fn keep_alive_interval(&self) -> u64 {
        (self.keep_alive_timeout_ms / 2).max(1)
    }
}

fn env_number(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a number", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_alive_interval_is_half_timeout() {
        let config = InitiatorConfig::default();
        assert_eq!(config.keep_alive_interval(), 5000);

        let tiny = InitiatorConfig {
            keep_alive_timeout_ms: 1,
            ..Default::default()
        };
        assert_eq!(tiny.keep_alive_interval(), 1);
    }
}
