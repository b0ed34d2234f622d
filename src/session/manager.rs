//! Session manager: connect, disconnect and reset of controller sessions

use std::net::IpAddr;
use std::sync::Arc;

use nvmf_shared::state_machine::SessionState;
use nvmf_shared::{AttemptConfig, GlobalConfig, IpMode};
use tracing::{debug, info, warn};

use super::connect::{ConnectCommand, ConnectPlan};
use super::connection::{ControllerSession, KeepAliveTimer, SessionParts};
use super::key::SessionKey;
use super::registry::{ConnectionRegistry, InsertError};
use crate::clock::TickSource;
use crate::config::InitiatorConfig;
use crate::error::{NvmfError, NvmfResult};
use crate::transport::{FabricConnector, FabricController};

/// Owns the registry and is the only component that changes its membership
pub struct SessionManager {
    registry: ConnectionRegistry,
    connector: Arc<dyn FabricConnector>,
    clock: Arc<dyn TickSource>,
    config: InitiatorConfig,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(
        connector: Arc<dyn FabricConnector>,
        clock: Arc<dyn TickSource>,
        config: InitiatorConfig,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(config.max_sessions),
            connector,
            clock,
            config,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut ConnectionRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &InitiatorConfig {
        &self.config
    }

    /// Validate, handshake and register a new session
    pub async fn connect(&mut self, cmd: &ConnectCommand, global: &GlobalConfig) -> NvmfResult<SessionKey> {
        let plan = cmd.validate(global, self.config.keep_alive_timeout_ms)?;

        if !self.connector.supports(plan.params.transport) {
            return Err(NvmfError::InvalidParameter(format!(
                "transport {} not supported by {}",
                plan.params.transport,
                self.connector.name()
            )));
        }
        if self.registry.is_full() {
            return Err(NvmfError::OutOfResources(format!(
                "session limit of {} reached",
                self.registry.capacity()
            )));
        }

        let controller = self.handshake(&plan).await?;
        self.register(plan, controller)
    }

    /// Connect a stored attempt, resolving its address first in DNS mode
    pub async fn connect_attempt(
        &mut self,
        attempt: &AttemptConfig,
        global: &GlobalConfig,
    ) -> NvmfResult<SessionKey> {
        if !attempt.enabled {
            return Err(NvmfError::InvalidParameter(format!(
                "attempt {} is disabled",
                attempt.name
            )));
        }

        let address = if attempt.dns_mode {
            resolve(attempt).await?.to_string()
        } else {
            attempt.target_address.clone()
        };

        let cmd = ConnectCommand::from_attempt(attempt, &address);
        self.connect(&cmd, global).await
    }

    async fn handshake(&self, plan: &ConnectPlan) -> NvmfResult<Box<dyn FabricController>> {
        let params = &plan.params;
        let tries = plan.retry_count as u32 + 1;
        let mut last_error = NvmfError::Timeout;

        for attempt in 1..=tries {
            debug!(
                "Connecting to {} ({}) via {}, attempt {}/{}",
                params.target,
                params.subsystem_nqn,
                self.connector.name(),
                attempt,
                tries
            );

            match tokio::time::timeout(plan.connect_timeout, self.connector.connect(params)).await {
                Ok(Ok(controller)) => return Ok(controller),
                Ok(Err(e)) => {
                    warn!("Handshake with {} failed: {}", params.target, e);
                    last_error = NvmfError::TransportUnreachable(e.to_string());
                }
                Err(_) => {
                    warn!(
                        "Handshake with {} timed out after {:?}",
                        params.target, plan.connect_timeout
                    );
                    last_error = NvmfError::Timeout;
                }
            }

            if attempt < tries {
                tokio::time::sleep(self.config.connect_retry_delay).await;
            }
        }

        Err(last_error)
    }

    /// Build the session around a fresh controller; rolls back on any failure
    fn register(&mut self, plan: ConnectPlan, mut controller: Box<dyn FabricController>) -> NvmfResult<SessionKey> {
        let params = plan.params;

        let io = match controller.create_io_queue(self.config.io_queue_depth) {
            Ok(io) => io,
            Err(e) => {
                controller.release();
                return Err(NvmfError::transport(e));
            }
        };

        let address = params.target.ip().to_string();
        let key = match SessionKey::derive(&address, params.target.port(), &params.subsystem_nqn, |k| {
            self.registry.contains(k)
        }) {
            Some(key) => key,
            None => {
                io.release();
                controller.release();
                return Err(NvmfError::OutOfResources(format!(
                    "no free session key for {}",
                    params.target
                )));
            }
        };

        let keep_alive = KeepAliveTimer::new(self.clock.now(), self.config.keep_alive_interval());
        let session = ControllerSession::new(
            key,
            SessionParts {
                controller,
                io,
                target: params.target,
                subsystem_nqn: params.subsystem_nqn,
                host_nqn: params.host_nqn,
                attempt: plan.attempt,
                keep_alive,
            },
        );
        let target = session.target;
        let subsystem_nqn = session.subsystem_nqn.clone();
        let controller_id = session.controller_id;
        let namespace_count = session.namespace_count;

        if let Err(InsertError { reason, session }) = self.registry.insert(session) {
            session.release();
            return Err(reason);
        }

        info!(
            "Session {} connected to {} ({}): controller {}, {} namespaces",
            key, target, subsystem_nqn, controller_id, namespace_count
        );
        Ok(key)
    }

    /// Tear down a session; a second call for the same key is `NotFound`
    pub fn disconnect(&mut self, key: &SessionKey) -> NvmfResult<()> {
        let session = self.registry.remove(key)?;
        let target = session.target;
        session.release();
        info!("Session {} disconnected from {}", key, target);
        Ok(())
    }

    /// Controller-level reset; I/O is refused until `reestablish`
    pub fn reset(&mut self, key: &SessionKey) -> NvmfResult<()> {
        let session = self
            .registry
            .find_mut(key)
            .ok_or_else(|| NvmfError::NotFound(format!("session {}", key)))?;

        session.controller_mut().reset().map_err(NvmfError::transport)?;
        session.mark_reset();
        info!("Session {} reset, I/O queues need re-establishment", key);
        Ok(())
    }

    /// Recreate the I/O queue pair of a reset session
    pub fn reestablish(&mut self, key: &SessionKey) -> NvmfResult<()> {
        let depth = self.config.io_queue_depth;
        let session = self
            .registry
            .find_mut(key)
            .ok_or_else(|| NvmfError::NotFound(format!("session {}", key)))?;

        match session.state() {
            SessionState::QueuesNeedReinit => {}
            SessionState::Live => return Ok(()),
            _ => return Err(NvmfError::SessionClosed),
        }

        let io = session
            .controller_mut()
            .create_io_queue(depth)
            .map_err(NvmfError::transport)?;
        session.install_io_queue(io);
        info!("Session {} I/O queues re-established", key);
        Ok(())
    }

    /// Tear down every session, newest first
    pub fn disconnect_all(&mut self) -> usize {
        let sessions = self.registry.drain();
        let count = sessions.len();
        for session in sessions {
            let key = session.key();
            session.release();
            debug!("Session {} released at shutdown", key);
        }
        if count > 0 {
            info!("Disconnected {} sessions", count);
        }
        count
    }
}

/// Resolve an attempt's DNS name to an address of its IP mode
async fn resolve(attempt: &AttemptConfig) -> NvmfResult<IpAddr> {
    let host = (attempt.target_address.as_str(), attempt.target_port);
    let addrs = tokio::net::lookup_host(host).await.map_err(|e| {
        NvmfError::TransportUnreachable(format!("cannot resolve {}: {}", attempt.target_address, e))
    })?;

    addrs
        .map(|addr| addr.ip())
        .find(|ip| match attempt.ip_mode {
            IpMode::Ipv4 => ip.is_ipv4(),
            IpMode::Ipv6 => ip.is_ipv6(),
            IpMode::Autoconfig => true,
        })
        .ok_or_else(|| {
            NvmfError::TransportUnreachable(format!(
                "{} has no address of mode {:?}",
                attempt.target_address, attempt.ip_mode
            ))
        })
}
