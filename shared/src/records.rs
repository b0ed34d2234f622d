//! Persisted configuration records
//!
//! `AttemptConfig` describes one named target connection; `GlobalConfig`
//! holds the host-wide defaults. Both are stored through the packed codec
//! in [`crate::codec`].

use uuid::Uuid;

use crate::timing;

/// Address family / acquisition mode of an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum IpMode {
    #[default]
    Ipv4 = 0,
    Ipv6 = 1,
    /// Try IPv4 first, fall back to IPv6 (DHCP only)
    Autoconfig = 2,
}

impl TryFrom<u8> for IpMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(IpMode::Ipv4),
            1 => Ok(IpMode::Ipv6),
            2 => Ok(IpMode::Autoconfig),
            other => Err(other),
        }
    }
}

/// Authentication applied when connecting an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum AuthType {
    #[default]
    None = 0,
    Chap = 1,
}

impl TryFrom<u8> for AuthType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AuthType::None),
            1 => Ok(AuthType::Chap),
            other => Err(other),
        }
    }
}

/// One named, persisted target description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptConfig {
    pub name: String,
    pub enabled: bool,
    /// Local address comes from DHCP; static fields below are advisory
    pub dhcp: bool,
    pub ip_mode: IpMode,
    pub local_ip: String,
    pub subnet_mask: String,
    pub gateway: String,
    pub transport_type: String,
    pub target_address: String,
    pub target_port: u16,
    pub subsystem_nqn: String,
    /// Host NQN override, only used when `use_host_nqn` is set
    pub host_nqn: String,
    /// Host ID override; nil means "use the global default"
    pub host_id: Uuid,
    pub use_host_nqn: bool,
    pub auth_type: AuthType,
    pub security_key_path: String,
    pub retry_count: u8,
    pub connect_timeout_ms: u16,
    /// Target address is a DNS name rather than an IP literal
    pub dns_mode: bool,
}

impl AttemptConfig {
    /// Create an enabled TCP attempt with default network settings
    pub fn new(
        name: impl Into<String>,
        target_address: impl Into<String>,
        target_port: u16,
        subsystem_nqn: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            target_address: target_address.into(),
            target_port,
            subsystem_nqn: subsystem_nqn.into(),
            ..Default::default()
        }
    }
}

impl Default for AttemptConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: false,
            dhcp: true,
            ip_mode: IpMode::Ipv4,
            local_ip: String::new(),
            subnet_mask: String::new(),
            gateway: String::new(),
            transport_type: "tcp".into(),
            target_address: String::new(),
            target_port: 4420,
            subsystem_nqn: String::new(),
            host_nqn: String::new(),
            host_id: Uuid::nil(),
            use_host_nqn: false,
            auth_type: AuthType::None,
            security_key_path: String::new(),
            retry_count: timing::DEFAULT_RETRY_COUNT,
            connect_timeout_ms: timing::DEFAULT_CONNECT_TIMEOUT_MS,
            dns_mode: false,
        }
    }
}

/// Host-wide settings, one instance per store
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GlobalConfig {
    pub enabled: bool,
    /// Number of attempts in the store; kept in step by the attempt store
    pub target_count: u16,
    pub host_nqn: String,
    pub host_id: Uuid,
    pub credential_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_defaults() {
        let attempt = AttemptConfig::default();
        assert_eq!(attempt.retry_count, 3);
        assert_eq!(attempt.connect_timeout_ms, 10000);
        assert_eq!(attempt.transport_type, "tcp");
        assert!(attempt.host_id.is_nil());
    }

    #[test]
    fn test_enum_conversions() {
        assert_eq!(IpMode::try_from(1), Ok(IpMode::Ipv6));
        assert_eq!(IpMode::try_from(7), Err(7));
        assert_eq!(AuthType::try_from(1), Ok(AuthType::Chap));
    }
}
