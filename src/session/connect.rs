//! Connect command and its validation
//!
//! Validation is synchronous and side-effect free: a command either turns
//! into a complete `ConnectPlan` or is rejected with `InvalidParameter`
//! before anything touches the network.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use nvmf_shared::codec::check_capacity;
use nvmf_shared::limits::{
    IP_TEXT_LEN, MAC_TEXT_LEN, MAX_RETRY_COUNT, NQN_LEN, TARGET_ADDRESS_LEN, TEXT_FIELD_LEN,
    TRANSPORT_TYPE_LEN,
};
use nvmf_shared::{timing, AttemptConfig, GlobalConfig, IpMode, HOST_NQN_UUID_PREFIX};
use uuid::Uuid;

use crate::error::{NvmfError, NvmfResult};
use crate::transport::{HandshakeParams, LocalBinding, TransportKind};

/// IP mode values accepted on a connect command
pub const IP_MODE_V4: u8 = 0;
pub const IP_MODE_V6: u8 = 1;

/// Parameters of a Connect request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectCommand {
    pub transport_type: String,
    pub subsystem_nqn: String,
    pub target_address: String,
    pub target_port: u16,
    /// Host identity as UUID text; empty means the global default
    pub host_identity: String,
    pub mac: String,
    /// 0 = IPv4, 1 = IPv6
    pub ip_mode: u8,
    /// Static local addressing; empty means DHCP
    pub local_ip: String,
    pub subnet_mask: String,
    pub gateway: String,
    pub connect_timeout_ms: u16,
    pub host_nqn: String,
    pub use_host_nqn: bool,
    /// Extra handshake attempts after the first
    pub retry_count: u8,
    /// Attempt this command was built from
    pub attempt: Option<String>,
}

impl Default for ConnectCommand {
    fn default() -> Self {
        Self {
            transport_type: "tcp".into(),
            subsystem_nqn: String::new(),
            target_address: String::new(),
            target_port: 4420,
            host_identity: String::new(),
            mac: String::new(),
            ip_mode: IP_MODE_V4,
            local_ip: String::new(),
            subnet_mask: String::new(),
            gateway: String::new(),
            connect_timeout_ms: timing::DEFAULT_CONNECT_TIMEOUT_MS,
            host_nqn: String::new(),
            use_host_nqn: false,
            retry_count: 0,
            attempt: None,
        }
    }
}

/// A validated command, ready for the handshake
#[derive(Debug, Clone)]
pub struct ConnectPlan {
    pub params: HandshakeParams,
    pub connect_timeout: Duration,
    pub retry_count: u8,
    pub attempt: Option<String>,
}

impl ConnectCommand {
    /// Connect command for a target with everything else defaulted
    pub fn new(target_address: impl Into<String>, target_port: u16, subsystem_nqn: impl Into<String>) -> Self {
        Self {
            target_address: target_address.into(),
            target_port,
            subsystem_nqn: subsystem_nqn.into(),
            ..Default::default()
        }
    }

    /// Build a command from a stored attempt
    ///
    /// `target_address` must already be an IP literal; DNS names are
    /// resolved by the caller. Autoconfig picks the family of the address.
    pub fn from_attempt(attempt: &AttemptConfig, target_address: &str) -> Self {
        let ip_mode = match attempt.ip_mode {
            IpMode::Ipv4 => IP_MODE_V4,
            IpMode::Ipv6 => IP_MODE_V6,
            IpMode::Autoconfig => match target_address.parse::<IpAddr>() {
                Ok(IpAddr::V6(_)) => IP_MODE_V6,
                _ => IP_MODE_V4,
            },
        };
        let (local_ip, subnet_mask, gateway) = if attempt.dhcp {
            (String::new(), String::new(), String::new())
        } else {
            (
                attempt.local_ip.clone(),
                attempt.subnet_mask.clone(),
                attempt.gateway.clone(),
            )
        };

        Self {
            transport_type: attempt.transport_type.clone(),
            subsystem_nqn: attempt.subsystem_nqn.clone(),
            target_address: target_address.to_string(),
            target_port: attempt.target_port,
            host_identity: if attempt.host_id.is_nil() {
                String::new()
            } else {
                attempt.host_id.to_string()
            },
            mac: String::new(),
            ip_mode,
            local_ip,
            subnet_mask,
            gateway,
            connect_timeout_ms: attempt.connect_timeout_ms,
            host_nqn: attempt.host_nqn.clone(),
            use_host_nqn: attempt.use_host_nqn,
            retry_count: attempt.retry_count,
            attempt: Some(attempt.name.clone()),
        }
    }

    /// Check every field and resolve the effective host identity
    pub fn validate(&self, global: &GlobalConfig, keep_alive_timeout_ms: u64) -> NvmfResult<ConnectPlan> {
        capacity("transport_type", &self.transport_type, TRANSPORT_TYPE_LEN)?;
        capacity("subsystem_nqn", &self.subsystem_nqn, NQN_LEN)?;
        capacity("target_address", &self.target_address, TARGET_ADDRESS_LEN)?;
        capacity("host_identity", &self.host_identity, TEXT_FIELD_LEN)?;
        capacity("mac", &self.mac, MAC_TEXT_LEN)?;
        capacity("local_ip", &self.local_ip, IP_TEXT_LEN)?;
        capacity("subnet_mask", &self.subnet_mask, IP_TEXT_LEN)?;
        capacity("gateway", &self.gateway, IP_TEXT_LEN)?;
        capacity("host_nqn", &self.host_nqn, NQN_LEN)?;

        let transport: TransportKind = self
            .transport_type
            .parse()
            .map_err(NvmfError::InvalidParameter)?;

        if self.subsystem_nqn.is_empty() {
            return Err(invalid("subsystem NQN is empty"));
        }
        if self.ip_mode > IP_MODE_V6 {
            return Err(invalid(format!("unknown IP mode {}", self.ip_mode)));
        }
        let address = parse_ip("target_address", &self.target_address, self.ip_mode)?;
        if self.target_port == 0 {
            return Err(invalid("target port is zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(invalid("connect timeout is zero"));
        }
        if self.retry_count > MAX_RETRY_COUNT {
            return Err(invalid(format!(
                "retry count {} exceeds {}",
                self.retry_count, MAX_RETRY_COUNT
            )));
        }

        let local = self.local_binding()?;
        let host_id = if self.host_identity.is_empty() {
            global.host_id
        } else {
            Uuid::parse_str(&self.host_identity)
                .map_err(|_| invalid(format!("host identity {:?} is not a UUID", self.host_identity)))?
        };

        Ok(ConnectPlan {
            params: HandshakeParams {
                transport,
                target: SocketAddr::new(address, self.target_port),
                subsystem_nqn: self.subsystem_nqn.clone(),
                host_nqn: self.effective_host_nqn(global, host_id),
                host_id,
                keep_alive_timeout_ms,
                local,
                mac: (!self.mac.is_empty()).then(|| self.mac.clone()),
            },
            connect_timeout: Duration::from_millis(self.connect_timeout_ms as u64),
            retry_count: self.retry_count,
            attempt: self.attempt.clone(),
        })
    }

    fn local_binding(&self) -> NvmfResult<Option<LocalBinding>> {
        if self.local_ip.is_empty() {
            return Ok(None);
        }
        let address = parse_ip("local_ip", &self.local_ip, self.ip_mode)?;
        let subnet_mask = parse_ip("subnet_mask", &self.subnet_mask, self.ip_mode)?;
        let gateway = if self.gateway.is_empty() {
            None
        } else {
            Some(parse_ip("gateway", &self.gateway, self.ip_mode)?)
        };
        Ok(Some(LocalBinding {
            address,
            subnet_mask,
            gateway,
        }))
    }

    fn effective_host_nqn(&self, global: &GlobalConfig, host_id: Uuid) -> String {
        if self.use_host_nqn && !self.host_nqn.is_empty() {
            return self.host_nqn.clone();
        }
        if self.host_identity.is_empty() && !global.host_nqn.is_empty() {
            return global.host_nqn.clone();
        }
        format!("{}{}", HOST_NQN_UUID_PREFIX, host_id)
    }
}

fn capacity(field: &'static str, value: &str, cap: usize) -> NvmfResult<()> {
    check_capacity(field, value, cap).map_err(|e| NvmfError::InvalidParameter(e.to_string()))
}

fn invalid(msg: impl Into<String>) -> NvmfError {
    NvmfError::InvalidParameter(msg.into())
}

fn parse_ip(field: &str, text: &str, ip_mode: u8) -> NvmfResult<IpAddr> {
    let parsed = match ip_mode {
        IP_MODE_V4 => text.parse().ok().map(IpAddr::V4),
        _ => text.parse().ok().map(IpAddr::V6),
    };
    parsed.ok_or_else(|| {
        let family = if ip_mode == IP_MODE_V4 { "IPv4" } else { "IPv6" };
        invalid(format!("{} {:?} is not an {} address", field, text, family))
    })
}
