//! Initiator facade
//!
//! Bundles the session manager, dispatcher, keep-alive scheduler and the
//! attempt store behind the external operation set: Connect, Read, Write,
//! Identify, Disconnect, Reset, List, ListConnect, Version and GetBootDesc.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use nvmf_shared::codec::RECORD_VERSION;
use nvmf_shared::NVMF_REVISION;
use tracing::{info, warn};

use crate::attempt::AttemptStore;
use crate::clock::TickSource;
use crate::command::{
    CommandDispatcher, IdentifyResult, IoCompletion, IoRequest, NamespaceEntry, RequestHandle,
};
use crate::config::InitiatorConfig;
use crate::error::{NvmfError, NvmfResult};
use crate::keepalive::{KeepAliveReport, KeepAliveScheduler};
use crate::session::{ConnectCommand, SessionKey, SessionManager, SessionSummary};
use crate::transport::FabricConnector;

/// Versions reported by `Initiator::version`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub crate_version: &'static str,
    pub record_version: u16,
    /// NVMe-oF revision targeted (major, minor, tertiary)
    pub nvmf_revision: (u16, u8, u8),
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor, tertiary) = self.nvmf_revision;
        write!(
            f,
            "nvmf-initiator {} (record v{}, NVMe-oF {}.{}",
            self.crate_version, self.record_version, major, minor
        )?;
        if tertiary != 0 {
            write!(f, ".{}", tertiary)?;
        }
        write!(f, ")")
    }
}

/// Boot option description of one connected namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootDescriptor {
    pub session: SessionKey,
    pub nsid: u32,
    pub description: String,
}

impl fmt::Display for BootDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// The initiator session layer
pub struct Initiator {
    manager: SessionManager,
    dispatcher: CommandDispatcher,
    keep_alive: KeepAliveScheduler,
    attempts: AttemptStore,
    clock: Arc<dyn TickSource>,
}

impl Initiator {
    pub fn new(
        connector: Arc<dyn FabricConnector>,
        clock: Arc<dyn TickSource>,
        config: InitiatorConfig,
        attempts: AttemptStore,
    ) -> Self {
        let dispatcher = CommandDispatcher::new(clock.clone(), &config);
        Self {
            manager: SessionManager::new(connector, clock.clone(), config),
            dispatcher,
            keep_alive: KeepAliveScheduler::new(),
            attempts,
            clock,
        }
    }

    pub fn attempts(&self) -> &AttemptStore {
        &self.attempts
    }

    pub fn attempts_mut(&mut self) -> &mut AttemptStore {
        &mut self.attempts
    }

    pub fn config(&self) -> &InitiatorConfig {
        self.manager.config()
    }

    /// Connect
    pub async fn connect(&mut self, cmd: &ConnectCommand) -> NvmfResult<SessionKey> {
        self.manager.connect(cmd, self.attempts.global()).await
    }

    /// Connect the stored attempt called `name`
    pub async fn connect_attempt(&mut self, name: &str) -> NvmfResult<SessionKey> {
        let attempt = self
            .attempts
            .get(name)
            .cloned()
            .ok_or_else(|| NvmfError::NotFound(format!("attempt {}", name)))?;
        self.manager
            .connect_attempt(&attempt, self.attempts.global())
            .await
    }

    /// Connect every enabled attempt, in store order
    ///
    /// One failing attempt does not stop the others.
    pub async fn connect_attempts(&mut self) -> Vec<(String, NvmfResult<SessionKey>)> {
        if !self.attempts.global().enabled {
            info!("Attempts disabled globally, nothing to connect");
            return Vec::new();
        }

        let enabled: Vec<_> = self.attempts.enabled().cloned().collect();
        let mut results = Vec::with_capacity(enabled.len());
        for attempt in enabled {
            let result = self
                .manager
                .connect_attempt(&attempt, self.attempts.global())
                .await;
            if let Err(e) = &result {
                warn!("Attempt {} failed: {}", attempt.name, e);
            }
            results.push((attempt.name, result));
        }
        results
    }

    /// Disconnect
    pub fn disconnect(&mut self, key: &SessionKey) -> NvmfResult<()> {
        self.manager.disconnect(key)
    }

    /// Reset
    pub fn reset(&mut self, key: &SessionKey) -> NvmfResult<()> {
        self.manager.reset(key)
    }

    pub fn reestablish(&mut self, key: &SessionKey) -> NvmfResult<()> {
        self.manager.reestablish(key)
    }

    /// Read, waiting for completion
    pub fn read(&mut self, req: &IoRequest, buf: &mut [u8]) -> NvmfResult<()> {
        self.dispatcher.read(self.manager.registry_mut(), req, buf)
    }

    /// Write, waiting for completion
    pub fn write(&mut self, req: &IoRequest, data: &[u8]) -> NvmfResult<()> {
        self.dispatcher.write(self.manager.registry_mut(), req, data)
    }

    pub fn submit_read(&mut self, req: &IoRequest) -> NvmfResult<RequestHandle> {
        self.dispatcher.submit_read(self.manager.registry_mut(), req)
    }

    pub fn submit_write(&mut self, req: &IoRequest, data: Bytes) -> NvmfResult<RequestHandle> {
        self.dispatcher
            .submit_write(self.manager.registry_mut(), req, data)
    }

    pub fn poll(&mut self, handle: &RequestHandle) -> NvmfResult<Option<IoCompletion>> {
        self.dispatcher.poll(self.manager.registry_mut(), handle)
    }

    pub fn abandon(&mut self, handle: &RequestHandle) -> NvmfResult<()> {
        self.dispatcher.abandon(self.manager.registry_mut(), handle)
    }

    /// Identify
    pub fn identify(&mut self, key: &SessionKey, nsid: u32) -> NvmfResult<IdentifyResult> {
        self.dispatcher
            .identify(self.manager.registry_mut(), key, nsid)
    }

    /// List: connected sessions in connect order
    pub fn list(&self) -> impl Iterator<Item = SessionSummary> + '_ {
        CommandDispatcher::list(self.manager.registry())
    }

    /// ListConnect: namespaces of connected sessions
    pub fn list_connect(&self) -> impl Iterator<Item = NamespaceEntry> + '_ {
        CommandDispatcher::list_namespaces(self.manager.registry())
    }

    /// Version
    pub fn version() -> VersionInfo {
        VersionInfo {
            crate_version: env!("CARGO_PKG_VERSION"),
            record_version: RECORD_VERSION,
            nvmf_revision: NVMF_REVISION,
        }
    }

    /// GetBootDesc
    pub fn boot_description(&self, key: &SessionKey, nsid: u32) -> NvmfResult<BootDescriptor> {
        let session = self
            .manager
            .registry()
            .find(key)
            .ok_or_else(|| NvmfError::NotFound(format!("session {}", key)))?;
        if nsid == 0 || nsid > session.namespace_count {
            return Err(NvmfError::InvalidParameter(format!(
                "namespace {} not in 1..={}",
                nsid, session.namespace_count
            )));
        }

        let label = match &session.attempt {
            Some(name) => name.clone(),
            None => key.to_string(),
        };
        Ok(BootDescriptor {
            session: *key,
            nsid,
            description: format!(
                "NVMeOF {} {} NSID {} {}:{}",
                label,
                session.subsystem_nqn,
                nsid,
                session.target.ip(),
                session.target.port()
            ),
        })
    }

    /// Keep-alive pass at the current tick
    pub fn tick(&mut self) -> KeepAliveReport {
        let now = self.clock.now();
        self.tick_at(now)
    }

    pub fn tick_at(&mut self, now: u64) -> KeepAliveReport {
        self.keep_alive.tick(self.manager.registry_mut(), now)
    }

    /// Disconnect every session
    pub fn shutdown(&mut self) -> usize {
        self.manager.disconnect_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTicks;
    use crate::transport::LoopbackFabric;
    use nvmf_shared::AttemptConfig;

    const NQN: &str = "nvmet-test";

    fn initiator(attempts: AttemptStore) -> (LoopbackFabric, Arc<ManualTicks>, Initiator) {
        let fabric = LoopbackFabric::new();
        fabric.add_subsystem("192.168.100.29:4420".parse().unwrap(), NQN, &[10]);
        let clock = Arc::new(ManualTicks::new(0));
        let init = Initiator::new(
            Arc::new(fabric.clone()),
            clock.clone(),
            InitiatorConfig::default(),
            attempts,
        );
        (fabric, clock, init)
    }

    #[tokio::test]
    async fn test_connect_list_disconnect_scenario() {
        let (_fabric, _clock, mut init) = initiator(AttemptStore::new());
        let cmd = ConnectCommand::new("192.168.100.29", 4420, NQN);

        let key = init.connect(&cmd).await.unwrap();
        let listed: Vec<_> = init.list().collect();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].subsystem_nqn, NQN);

        init.disconnect(&key).unwrap();
        assert_eq!(init.list().count(), 0);
        assert!(matches!(init.disconnect(&key), Err(NvmfError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_boot_description() {
        let mut attempts = AttemptStore::new();
        attempts
            .add(AttemptConfig::new("boot0", "192.168.100.29", 4420, NQN))
            .unwrap();
        let (_fabric, _clock, mut init) = initiator(attempts);

        let key = init.connect_attempt("boot0").await.unwrap();
        let desc = init.boot_description(&key, 1).unwrap();
        assert_eq!(
            desc.to_string(),
            "NVMeOF boot0 nvmet-test NSID 1 192.168.100.29:4420"
        );

        assert!(matches!(
            init.boot_description(&key, 2),
            Err(NvmfError::InvalidParameter(_))
        ));

        let anonymous = init
            .connect(&ConnectCommand::new("192.168.100.29", 4420, NQN))
            .await
            .unwrap();
        let desc = init.boot_description(&anonymous, 1).unwrap();
        assert!(desc.description.starts_with(&format!("NVMeOF {} ", anonymous)));
    }

    #[tokio::test]
    async fn test_connect_attempts_reports_each() {
        let mut attempts = AttemptStore::new();
        attempts
            .add(AttemptConfig::new("good", "192.168.100.29", 4420, NQN))
            .unwrap();
        let mut unreachable = AttemptConfig::new("bad", "192.168.100.30", 4420, NQN);
        unreachable.retry_count = 0;
        attempts.add(unreachable).unwrap();
        let (_fabric, _clock, mut init) = initiator(attempts);

        let results = init.connect_attempts().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(NvmfError::TransportUnreachable(_))));
        assert_eq!(init.list_connect().count(), 1);
    }

    #[tokio::test]
    async fn test_tick_uses_clock() {
        let (fabric, clock, mut init) = initiator(AttemptStore::new());
        init.connect(&ConnectCommand::new("192.168.100.29", 4420, NQN))
            .await
            .unwrap();

        assert_eq!(init.tick().sent, 0);
        clock.advance(init.config().keep_alive_interval());
        assert_eq!(init.tick().sent, 1);
        assert_eq!(fabric.stats().keep_alives, 1);

        assert_eq!(init.shutdown(), 1);
        assert_eq!(fabric.stats().live_controllers, 0);
    }

    #[test]
    fn test_version() {
        let version = Initiator::version();
        assert_eq!(version.record_version, 1);
        assert_eq!(version.nvmf_revision, (1, 1, 0));
        assert!(version.to_string().contains("NVMe-oF 1.1"));
    }
}
