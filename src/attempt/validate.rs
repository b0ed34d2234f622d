//! Attempt validation rules
//!
//! Checks are synchronous and side-effect free. Uniqueness is checked
//! against the names passed in by the store.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use nvmf_shared::limits::{
    ATTEMPT_NAME_LEN, IP_TEXT_LEN, KEY_PATH_LEN, MAX_CONNECT_TIMEOUT_MS, MAX_RETRY_COUNT,
    MIN_CONNECT_TIMEOUT_MS, NQN_LEN, TARGET_ADDRESS_LEN, TRANSPORT_TYPE_LEN,
};
use nvmf_shared::{AttemptConfig, AuthType, IpMode};
use thiserror::Error;

use crate::transport::TransportKind;

/// Reasons an attempt is rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Attempt name is empty")]
    EmptyName,

    #[error("Attempt name {0:?} contains non-printable characters")]
    NameNotPrintable(String),

    #[error("Attempt {0:?} already exists")]
    DuplicateName(String),

    #[error("Attempt {0:?} not found")]
    UnknownAttempt(String),

    #[error("Field {field} is {len} bytes (capacity {capacity})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        capacity: usize,
    },

    #[error("Field {0} contains a NUL byte")]
    EmbeddedNul(&'static str),

    #[error("Unsupported transport type {0:?}")]
    UnsupportedTransport(String),

    #[error("Retry count {0} exceeds {max}", max = MAX_RETRY_COUNT)]
    RetryCountOutOfRange(u8),

    #[error("Connect timeout {0} ms outside {min}..={max}", min = MIN_CONNECT_TIMEOUT_MS, max = MAX_CONNECT_TIMEOUT_MS)]
    ConnectTimeoutOutOfRange(u16),

    #[error("Enabled attempt is missing {0}")]
    MissingField(&'static str),

    #[error("Field {field} value {value:?} is not a valid {mode:?} address")]
    InvalidAddress {
        field: &'static str,
        value: String,
        mode: IpMode,
    },

    #[error("Autoconfig IP mode requires DHCP")]
    AutoconfigWithoutDhcp,

    #[error("Host NQN override enabled without a host NQN")]
    MissingHostNqn,

    #[error("CHAP authentication requires a security key path")]
    MissingSecurityKey,
}

/// Validate an attempt against the names already taken in its store
pub fn validate_attempt<'a>(
    attempt: &AttemptConfig,
    taken: impl IntoIterator<Item = &'a str>,
) -> Result<(), ValidationError> {
    validate_name(&attempt.name)?;
    if taken.into_iter().any(|name| name == attempt.name) {
        return Err(ValidationError::DuplicateName(attempt.name.clone()));
    }

    capacity("transport_type", &attempt.transport_type, TRANSPORT_TYPE_LEN)?;
    capacity("local_ip", &attempt.local_ip, IP_TEXT_LEN)?;
    capacity("subnet_mask", &attempt.subnet_mask, IP_TEXT_LEN)?;
    capacity("gateway", &attempt.gateway, IP_TEXT_LEN)?;
    capacity("target_address", &attempt.target_address, TARGET_ADDRESS_LEN)?;
    capacity("subsystem_nqn", &attempt.subsystem_nqn, NQN_LEN)?;
    capacity("host_nqn", &attempt.host_nqn, NQN_LEN)?;
    capacity("security_key_path", &attempt.security_key_path, KEY_PATH_LEN)?;

    if attempt.transport_type.parse::<TransportKind>().is_err() {
        return Err(ValidationError::UnsupportedTransport(
            attempt.transport_type.clone(),
        ));
    }
    if attempt.retry_count > MAX_RETRY_COUNT {
        return Err(ValidationError::RetryCountOutOfRange(attempt.retry_count));
    }
    if !(MIN_CONNECT_TIMEOUT_MS..=MAX_CONNECT_TIMEOUT_MS).contains(&attempt.connect_timeout_ms) {
        return Err(ValidationError::ConnectTimeoutOutOfRange(
            attempt.connect_timeout_ms,
        ));
    }

    if attempt.enabled {
        if attempt.subsystem_nqn.is_empty() {
            return Err(ValidationError::MissingField("subsystem NQN"));
        }
        if attempt.target_address.is_empty() {
            return Err(ValidationError::MissingField("target address"));
        }
        if attempt.target_port == 0 {
            return Err(ValidationError::MissingField("target port"));
        }
    }

    if !attempt.dns_mode && !attempt.target_address.is_empty() {
        check_ip("target_address", &attempt.target_address, attempt.ip_mode)?;
    }

    if attempt.ip_mode == IpMode::Autoconfig && !attempt.dhcp {
        return Err(ValidationError::AutoconfigWithoutDhcp);
    }
    if !attempt.dhcp {
        check_ip("local_ip", &attempt.local_ip, attempt.ip_mode)?;
        check_ip("subnet_mask", &attempt.subnet_mask, attempt.ip_mode)?;
        if !attempt.gateway.is_empty() {
            check_ip("gateway", &attempt.gateway, attempt.ip_mode)?;
        }
    }

    if attempt.use_host_nqn && attempt.host_nqn.is_empty() {
        return Err(ValidationError::MissingHostNqn);
    }
    if attempt.auth_type == AuthType::Chap && attempt.security_key_path.is_empty() {
        return Err(ValidationError::MissingSecurityKey);
    }

    Ok(())
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    capacity("name", name, ATTEMPT_NAME_LEN)?;
    if !name.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
        return Err(ValidationError::NameNotPrintable(name.to_string()));
    }
    Ok(())
}

fn capacity(field: &'static str, value: &str, capacity: usize) -> Result<(), ValidationError> {
    if value.len() > capacity {
        return Err(ValidationError::FieldTooLong {
            field,
            len: value.len(),
            capacity,
        });
    }
    if value.contains('\0') {
        return Err(ValidationError::EmbeddedNul(field));
    }
    Ok(())
}

fn check_ip(field: &'static str, value: &str, mode: IpMode) -> Result<(), ValidationError> {
    let ok = match mode {
        IpMode::Ipv4 => value.parse::<Ipv4Addr>().is_ok(),
        IpMode::Ipv6 => value.parse::<Ipv6Addr>().is_ok(),
        IpMode::Autoconfig => value.parse::<IpAddr>().is_ok(),
    };
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
            mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt() -> AttemptConfig {
        AttemptConfig::new("boot0", "192.168.100.29", 4420, "nvmet-test")
    }

    fn check(attempt: &AttemptConfig) -> Result<(), ValidationError> {
        validate_attempt(attempt, std::iter::empty())
    }

    #[test]
    fn test_default_attempt_valid() {
        assert_eq!(check(&attempt()), Ok(()));
    }

    #[test]
    fn test_name_rules() {
        let mut a = attempt();
        a.name = String::new();
        assert_eq!(check(&a), Err(ValidationError::EmptyName));

        a.name = "attempt-name-13".into();
        assert!(matches!(check(&a), Err(ValidationError::FieldTooLong { field: "name", .. })));

        a.name = "bad\tname".into();
        assert!(matches!(check(&a), Err(ValidationError::NameNotPrintable(_))));

        let a = attempt();
        assert_eq!(
            validate_attempt(&a, ["boot0"]),
            Err(ValidationError::DuplicateName("boot0".into()))
        );
    }

    #[test]
    fn test_oversized_nqn_rejected_not_truncated() {
        let mut a = attempt();
        a.subsystem_nqn = "n".repeat(300);
        assert_eq!(
            check(&a),
            Err(ValidationError::FieldTooLong {
                field: "subsystem_nqn",
                len: 300,
                capacity: NQN_LEN
            })
        );
    }

    #[test]
    fn test_embedded_nul_rejected() {
        let mut a = attempt();
        a.subsystem_nqn = "nqn.a\0tail".into();
        assert_eq!(check(&a), Err(ValidationError::EmbeddedNul("subsystem_nqn")));

        let mut a = attempt();
        a.security_key_path = "/keys/\0chap".into();
        assert_eq!(check(&a), Err(ValidationError::EmbeddedNul("security_key_path")));

        let mut a = attempt();
        a.name = "boot\0".into();
        assert_eq!(check(&a), Err(ValidationError::EmbeddedNul("name")));
    }

    #[test]
    fn test_numeric_bounds() {
        let mut a = attempt();
        a.retry_count = 17;
        assert_eq!(check(&a), Err(ValidationError::RetryCountOutOfRange(17)));

        let mut a = attempt();
        a.connect_timeout_ms = 50;
        assert_eq!(check(&a), Err(ValidationError::ConnectTimeoutOutOfRange(50)));
    }

    #[test]
    fn test_enabled_needs_target() {
        let mut a = attempt();
        a.target_port = 0;
        assert_eq!(check(&a), Err(ValidationError::MissingField("target port")));

        // Disabled attempts may be incomplete
        a.enabled = false;
        assert_eq!(check(&a), Ok(()));
    }

    #[test]
    fn test_address_family() {
        let mut a = attempt();
        a.ip_mode = IpMode::Ipv6;
        assert!(matches!(check(&a), Err(ValidationError::InvalidAddress { .. })));

        a.dns_mode = true;
        a.target_address = "target.example".into();
        assert_eq!(check(&a), Ok(()));
    }

    #[test]
    fn test_flag_combinations() {
        let mut a = attempt();
        a.dhcp = false;
        a.ip_mode = IpMode::Autoconfig;
        assert_eq!(check(&a), Err(ValidationError::AutoconfigWithoutDhcp));

        let mut a = attempt();
        a.dhcp = false;
        assert!(matches!(
            check(&a),
            Err(ValidationError::InvalidAddress { field: "local_ip", .. })
        ));
        a.local_ip = "192.168.100.10".into();
        a.subnet_mask = "255.255.255.0".into();
        assert_eq!(check(&a), Ok(()));

        let mut a = attempt();
        a.use_host_nqn = true;
        assert_eq!(check(&a), Err(ValidationError::MissingHostNqn));

        let mut a = attempt();
        a.auth_type = AuthType::Chap;
        assert_eq!(check(&a), Err(ValidationError::MissingSecurityKey));
    }
}
