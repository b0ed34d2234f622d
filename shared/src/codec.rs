//! Packed, versioned codec for persisted configuration records
//!
//! Every record starts with a version tag that is checked before any other
//! field is read:
//! ```text
//! [ 2 bytes: version (u16, little-endian) ][ fixed-size record body ]
//! ```
//!
//! The attempt set is stored as a count followed by fixed-size records:
//! ```text
//! [ 2 bytes: count (u16, little-endian) ][ count x ATTEMPT_RECORD_LEN ]
//! ```
//!
//! Text fields are zero-padded to their capacity. A value longer than its
//! capacity, or one holding a NUL byte, is an encode error, never truncated.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use uuid::Uuid;

use crate::limits::*;
use crate::{AttemptConfig, AuthType, GlobalConfig, IpMode};

/// Record layout version written by this crate
pub const RECORD_VERSION: u16 = 1;

/// Size of one packed attempt record, version tag included
pub const ATTEMPT_RECORD_LEN: usize = 2
    + ATTEMPT_NAME_LEN
    + 8 // flag and small-integer bytes
    + 4 // port, connect timeout
    + 3 * IP_TEXT_LEN
    + TRANSPORT_TYPE_LEN
    + TARGET_ADDRESS_LEN
    + 2 * NQN_LEN
    + 16 // host id
    + KEY_PATH_LEN;

/// Size of the packed global record, version tag included
pub const GLOBAL_RECORD_LEN: usize = 2 + 1 + 1 + 2 + NQN_LEN + 16 + KEY_PATH_LEN;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unsupported record version {found} (supported: {supported})", supported = RECORD_VERSION)]
    UnsupportedVersion { found: u16 },

    #[error("Record truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Field {field} is {len} bytes (capacity {capacity})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        capacity: usize,
    },

    #[error("Field {field} is not valid UTF-8")]
    InvalidText { field: &'static str },

    #[error("Field {field} contains a NUL byte")]
    EmbeddedNul { field: &'static str },

    #[error("Field {field} has invalid value {value}")]
    InvalidEnum { field: &'static str, value: u8 },

    #[error("Trailing data after record set: {0} bytes")]
    TrailingData(usize),
}

/// Encode a single attempt record
pub fn encode_attempt(attempt: &AttemptConfig) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(ATTEMPT_RECORD_LEN);
    encode_attempt_into(attempt, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a single attempt record directly into a provided buffer
pub fn encode_attempt_into(attempt: &AttemptConfig, buf: &mut BytesMut) -> Result<(), CodecError> {
    buf.reserve(ATTEMPT_RECORD_LEN);

    buf.put_u16_le(RECORD_VERSION);
    put_text(buf, "name", &attempt.name, ATTEMPT_NAME_LEN)?;

    buf.put_u8(attempt.enabled as u8);
    buf.put_u8(attempt.dhcp as u8);
    buf.put_u8(attempt.ip_mode as u8);
    buf.put_u8(attempt.use_host_nqn as u8);
    buf.put_u8(attempt.auth_type as u8);
    buf.put_u8(attempt.dns_mode as u8);
    buf.put_u8(attempt.retry_count);
    buf.put_u8(0); // reserved

    buf.put_u16_le(attempt.target_port);
    buf.put_u16_le(attempt.connect_timeout_ms);

    put_text(buf, "local_ip", &attempt.local_ip, IP_TEXT_LEN)?;
    put_text(buf, "subnet_mask", &attempt.subnet_mask, IP_TEXT_LEN)?;
    put_text(buf, "gateway", &attempt.gateway, IP_TEXT_LEN)?;
    put_text(buf, "transport_type", &attempt.transport_type, TRANSPORT_TYPE_LEN)?;
    put_text(buf, "target_address", &attempt.target_address, TARGET_ADDRESS_LEN)?;
    put_text(buf, "subsystem_nqn", &attempt.subsystem_nqn, NQN_LEN)?;
    put_text(buf, "host_nqn", &attempt.host_nqn, NQN_LEN)?;
    buf.put_slice(attempt.host_id.as_bytes());
    put_text(buf, "security_key_path", &attempt.security_key_path, KEY_PATH_LEN)?;

    Ok(())
}

/// Decode a single attempt record, checking its version tag first
pub fn decode_attempt(mut buf: &[u8]) -> Result<AttemptConfig, CodecError> {
    let attempt = decode_attempt_from(&mut buf)?;
    if !buf.is_empty() {
        return Err(CodecError::TrailingData(buf.len()));
    }
    Ok(attempt)
}

fn decode_attempt_from(buf: &mut &[u8]) -> Result<AttemptConfig, CodecError> {
    check_version(buf)?;
    ensure(buf, ATTEMPT_RECORD_LEN - 2)?;

    let name = get_text(buf, "name", ATTEMPT_NAME_LEN)?;

    let enabled = buf.get_u8() != 0;
    let dhcp = buf.get_u8() != 0;
    let ip_mode = IpMode::try_from(buf.get_u8())
        .map_err(|value| CodecError::InvalidEnum { field: "ip_mode", value })?;
    let use_host_nqn = buf.get_u8() != 0;
    let auth_type = AuthType::try_from(buf.get_u8())
        .map_err(|value| CodecError::InvalidEnum { field: "auth_type", value })?;
    let dns_mode = buf.get_u8() != 0;
    let retry_count = buf.get_u8();
    buf.advance(1); // reserved

    let target_port = buf.get_u16_le();
    let connect_timeout_ms = buf.get_u16_le();

    let local_ip = get_text(buf, "local_ip", IP_TEXT_LEN)?;
    let subnet_mask = get_text(buf, "subnet_mask", IP_TEXT_LEN)?;
    let gateway = get_text(buf, "gateway", IP_TEXT_LEN)?;
    let transport_type = get_text(buf, "transport_type", TRANSPORT_TYPE_LEN)?;
    let target_address = get_text(buf, "target_address", TARGET_ADDRESS_LEN)?;
    let subsystem_nqn = get_text(buf, "subsystem_nqn", NQN_LEN)?;
    let host_nqn = get_text(buf, "host_nqn", NQN_LEN)?;
    let host_id = get_uuid(buf);
    let security_key_path = get_text(buf, "security_key_path", KEY_PATH_LEN)?;

    Ok(AttemptConfig {
        name,
        enabled,
        dhcp,
        ip_mode,
        local_ip,
        subnet_mask,
        gateway,
        transport_type,
        target_address,
        target_port,
        subsystem_nqn,
        host_nqn,
        host_id,
        use_host_nqn,
        auth_type,
        security_key_path,
        retry_count,
        connect_timeout_ms,
        dns_mode,
    })
}

/// Encode a full attempt set (count prefix + records)
pub fn encode_attempt_set(attempts: &[AttemptConfig]) -> Result<Bytes, CodecError> {
    let count = u16::try_from(attempts.len()).map_err(|_| CodecError::FieldTooLong {
        field: "attempt_count",
        len: attempts.len(),
        capacity: u16::MAX as usize,
    })?;

    let mut buf = BytesMut::with_capacity(2 + attempts.len() * ATTEMPT_RECORD_LEN);
    buf.put_u16_le(count);
    for attempt in attempts {
        encode_attempt_into(attempt, &mut buf)?;
    }
    Ok(buf.freeze())
}

/// Decode a full attempt set
///
/// Any record with an unrecognized version rejects the whole set.
pub fn decode_attempt_set(mut buf: &[u8]) -> Result<Vec<AttemptConfig>, CodecError> {
    ensure(&buf, 2)?;
    let count = buf.get_u16_le() as usize;

    let mut attempts = Vec::with_capacity(count);
    for _ in 0..count {
        attempts.push(decode_attempt_from(&mut buf)?);
    }

    if !buf.is_empty() {
        return Err(CodecError::TrailingData(buf.len()));
    }
    Ok(attempts)
}

/// Encode the global record
pub fn encode_global(global: &GlobalConfig) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(GLOBAL_RECORD_LEN);

    buf.put_u16_le(RECORD_VERSION);
    buf.put_u8(global.enabled as u8);
    buf.put_u8(0); // reserved
    buf.put_u16_le(global.target_count);
    put_text(&mut buf, "host_nqn", &global.host_nqn, NQN_LEN)?;
    buf.put_slice(global.host_id.as_bytes());
    put_text(&mut buf, "credential_path", &global.credential_path, KEY_PATH_LEN)?;

    Ok(buf.freeze())
}

/// Decode the global record, checking its version tag first
pub fn decode_global(mut buf: &[u8]) -> Result<GlobalConfig, CodecError> {
    check_version(&mut buf)?;
    ensure(&buf, GLOBAL_RECORD_LEN - 2)?;

    let enabled = buf.get_u8() != 0;
    buf.advance(1); // reserved
    let target_count = buf.get_u16_le();
    let host_nqn = get_text(&mut buf, "host_nqn", NQN_LEN)?;
    let host_id = get_uuid(&mut buf);
    let credential_path = get_text(&mut buf, "credential_path", KEY_PATH_LEN)?;

    if !buf.is_empty() {
        return Err(CodecError::TrailingData(buf.len()));
    }

    Ok(GlobalConfig {
        enabled,
        target_count,
        host_nqn,
        host_id,
        credential_path,
    })
}

/// Check that a text value fits a fixed field without truncation
pub fn check_capacity(field: &'static str, value: &str, capacity: usize) -> Result<(), CodecError> {
    if value.len() > capacity {
        return Err(CodecError::FieldTooLong {
            field,
            len: value.len(),
            capacity,
        });
    }
    if value.contains('\0') {
        return Err(CodecError::EmbeddedNul { field });
    }
    Ok(())
}

fn check_version(buf: &mut &[u8]) -> Result<(), CodecError> {
    ensure(buf, 2)?;
    let found = buf.get_u16_le();
    if found != RECORD_VERSION {
        return Err(CodecError::UnsupportedVersion { found });
    }
    Ok(())
}

fn ensure(buf: &&[u8], needed: usize) -> Result<(), CodecError> {
    if buf.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

fn put_text(buf: &mut BytesMut, field: &'static str, value: &str, capacity: usize) -> Result<(), CodecError> {
    check_capacity(field, value, capacity)?;
    buf.put_slice(value.as_bytes());
    buf.put_bytes(0, capacity - value.len());
    Ok(())
}

fn get_text(buf: &mut &[u8], field: &'static str, capacity: usize) -> Result<String, CodecError> {
    let raw = &buf[..capacity];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(capacity);
    let text = std::str::from_utf8(&raw[..end])
        .map_err(|_| CodecError::InvalidText { field })?
        .to_string();
    buf.advance(capacity);
    Ok(text)
}

fn get_uuid(buf: &mut &[u8]) -> Uuid {
    let mut raw = [0u8; 16];
    buf.copy_to_slice(&mut raw);
    Uuid::from_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_attempt(name: &str) -> AttemptConfig {
        AttemptConfig {
            dhcp: false,
            ip_mode: IpMode::Ipv4,
            local_ip: "192.168.100.10".into(),
            subnet_mask: "255.255.255.0".into(),
            gateway: "192.168.100.1".into(),
            host_nqn: "nqn.2014-08.org.nvmexpress:uuid:test-host".into(),
            host_id: Uuid::from_u128(0x1234),
            use_host_nqn: true,
            auth_type: AuthType::Chap,
            security_key_path: "/etc/nvme/key".into(),
            ..AttemptConfig::new(name, "192.168.100.29", 4420, "nvmet-test")
        }
    }

    #[test]
    fn test_record_len_matches_layout() {
        let encoded = encode_attempt(&create_test_attempt("a1")).expect("encode failed");
        assert_eq!(encoded.len(), ATTEMPT_RECORD_LEN);

        let global = encode_global(&GlobalConfig::default()).expect("encode failed");
        assert_eq!(global.len(), GLOBAL_RECORD_LEN);
    }

    #[test]
    fn test_attempt_set_is_byte_stable() {
        let attempts = vec![create_test_attempt("a1"), create_test_attempt("a2")];

        let encoded = encode_attempt_set(&attempts).expect("encode failed");
        let decoded = decode_attempt_set(&encoded).expect("decode failed");
        assert_eq!(decoded, attempts);

        let reencoded = encode_attempt_set(&decoded).expect("encode failed");
        assert_eq!(reencoded, encoded);
    }

    #[test]
    fn test_newer_version_rejected() {
        let mut encoded = BytesMut::from(&encode_attempt(&create_test_attempt("a1")).unwrap()[..]);
        encoded[0..2].copy_from_slice(&(RECORD_VERSION + 1).to_le_bytes());

        let result = decode_attempt(&encoded);
        assert_eq!(
            result,
            Err(CodecError::UnsupportedVersion {
                found: RECORD_VERSION + 1
            })
        );
    }

    #[test]
    fn test_one_bad_record_rejects_set() {
        let attempts = vec![create_test_attempt("a1"), create_test_attempt("a2")];
        let mut encoded = BytesMut::from(&encode_attempt_set(&attempts).unwrap()[..]);

        // Second record's version tag
        let offset = 2 + ATTEMPT_RECORD_LEN;
        encoded[offset..offset + 2].copy_from_slice(&9u16.to_le_bytes());

        assert!(matches!(
            decode_attempt_set(&encoded),
            Err(CodecError::UnsupportedVersion { found: 9 })
        ));
    }

    #[test]
    fn test_oversized_field_not_truncated() {
        let mut attempt = create_test_attempt("a1");
        attempt.subsystem_nqn = "n".repeat(NQN_LEN + 1);

        let result = encode_attempt(&attempt);
        assert!(matches!(
            result,
            Err(CodecError::FieldTooLong { field: "subsystem_nqn", .. })
        ));
    }

    #[test]
    fn test_embedded_nul_not_cut() {
        let mut attempt = create_test_attempt("a1");
        attempt.subsystem_nqn = "nqn.a\0tail".into();

        assert_eq!(
            encode_attempt(&attempt),
            Err(CodecError::EmbeddedNul { field: "subsystem_nqn" })
        );
    }

    #[test]
    fn test_full_capacity_field_survives() {
        let mut attempt = create_test_attempt("exactly12chr");
        attempt.subsystem_nqn = "n".repeat(NQN_LEN);

        let encoded = encode_attempt(&attempt).expect("encode failed");
        let decoded = decode_attempt(&encoded).expect("decode failed");
        assert_eq!(decoded.name, "exactly12chr");
        assert_eq!(decoded.subsystem_nqn.len(), NQN_LEN);
    }

    #[test]
    fn test_truncated_record() {
        let encoded = encode_attempt(&create_test_attempt("a1")).unwrap();
        let result = decode_attempt(&encoded[..100]);
        assert!(matches!(result, Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_invalid_enum_value() {
        let mut encoded = BytesMut::from(&encode_attempt(&create_test_attempt("a1")).unwrap()[..]);
        // ip_mode byte follows version, name, enabled, dhcp
        encoded[2 + ATTEMPT_NAME_LEN + 2] = 9;

        assert_eq!(
            decode_attempt(&encoded),
            Err(CodecError::InvalidEnum {
                field: "ip_mode",
                value: 9
            })
        );
    }

    #[test]
    fn test_global_record() {
        let global = GlobalConfig {
            enabled: true,
            target_count: 2,
            host_nqn: "nqn.2014-08.org.nvmexpress:uuid:host".into(),
            host_id: Uuid::from_u128(42),
            credential_path: "/etc/nvme/hostkey".into(),
        };

        let encoded = encode_global(&global).expect("encode failed");
        assert_eq!(decode_global(&encoded).expect("decode failed"), global);
    }
}
