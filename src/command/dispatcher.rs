//! Command dispatcher for block I/O and identify
//!
//! Synchronous calls drive a local completion-poll loop against the tick
//! source until the command completes or the deadline sampled at call
//! entry passes. A timed-out command is abandoned: its slot stays held
//! until the late completion is reaped and discarded.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use nvmf_shared::timing::BLOCK_SIZE;
use tracing::{debug, trace, warn};

use super::identify::{ControllerIdentify, IdentifyResult, NamespaceIdentify};
use crate::clock::TickSource;
use crate::config::InitiatorConfig;
use crate::error::{NvmfError, NvmfResult};
use crate::session::{
    CommandTracker, ConnectionRegistry, ControllerSession, NamespaceGeometry, RequestId,
    SessionKey, SessionSummary,
};
use crate::transport::{Completion, IdentifyCns, NvmeCommand, QueuePair, SubmitError};

/// Block range of a read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoRequest {
    pub session: SessionKey,
    pub nsid: u32,
    pub start_lba: u64,
    pub block_count: u32,
}

impl IoRequest {
    pub fn new(session: SessionKey, nsid: u32, start_lba: u64, block_count: u32) -> Self {
        Self {
            session,
            nsid,
            start_lba,
            block_count,
        }
    }

    /// Transfer length in bytes
    pub fn data_len(&self) -> u64 {
        self.block_count as u64 * BLOCK_SIZE
    }
}

/// Direction of an asynchronous request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

/// Handle of an asynchronously submitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHandle {
    pub session: SessionKey,
    pub request: RequestId,
    pub direction: IoDirection,
}

/// Outcome of an asynchronous request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoCompletion {
    pub request: RequestId,
    /// Data of a completed read
    pub data: Option<Bytes>,
}

/// A namespace exposed by a connected session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceEntry {
    pub session: SessionKey,
    pub nsid: u32,
    pub subsystem_nqn: String,
    pub target: SocketAddr,
    /// Known once the namespace has been identified
    pub geometry: Option<NamespaceGeometry>,
}

/// Dispatches commands onto session queue pairs
pub struct CommandDispatcher {
    clock: Arc<dyn TickSource>,
    io_timeout_ms: u64,
    admin_timeout_ms: u64,
    next_request: RequestId,
}

impl CommandDispatcher {
    /// Create a new command dispatcher
    pub fn new(clock: Arc<dyn TickSource>, config: &InitiatorConfig) -> Self {
        Self {
            clock,
            io_timeout_ms: config.io_timeout_ms,
            admin_timeout_ms: config.admin_timeout_ms,
            next_request: 0,
        }
    }

    fn next_request_id(&mut self) -> RequestId {
        self.next_request += 1;
        self.next_request
    }

    /// Read `block_count` blocks into `buf`, waiting for completion
    pub fn read(&mut self, registry: &mut ConnectionRegistry, req: &IoRequest, buf: &mut [u8]) -> NvmfResult<()> {
        let deadline = self.clock.now().saturating_add(self.io_timeout_ms);
        let len = self.check_io(registry, req, buf.len())?;

        let request = self.next_request_id();
        let command = NvmeCommand::Read {
            nsid: req.nsid,
            slba: req.start_lba,
            nlb: req.block_count,
        };
        let completion = self.execute_io(registry, &req.session, request, command, deadline)?;

        match completion.data {
            Some(data) if data.len() >= len => {
                buf[..len].copy_from_slice(&data[..len]);
                Ok(())
            }
            _ => Err(NvmfError::TransportError(format!(
                "short read of request {}",
                request
            ))),
        }
    }

    /// Write `block_count` blocks from `data`, waiting for completion
    pub fn write(&mut self, registry: &mut ConnectionRegistry, req: &IoRequest, data: &[u8]) -> NvmfResult<()> {
        let deadline = self.clock.now().saturating_add(self.io_timeout_ms);
        let len = self.check_io(registry, req, data.len())?;

        let request = self.next_request_id();
        let command = NvmeCommand::Write {
            nsid: req.nsid,
            slba: req.start_lba,
            nlb: req.block_count,
            data: Bytes::copy_from_slice(&data[..len]),
        };
        self.execute_io(registry, &req.session, request, command, deadline)?;
        Ok(())
    }

    /// Submit a read and return without waiting
    pub fn submit_read(&mut self, registry: &mut ConnectionRegistry, req: &IoRequest) -> NvmfResult<RequestHandle> {
        self.check_io(registry, req, req.data_len() as usize)?;
        let command = NvmeCommand::Read {
            nsid: req.nsid,
            slba: req.start_lba,
            nlb: req.block_count,
        };
        self.submit_io(registry, req, command, IoDirection::Read)
    }

    /// Submit a write and return without waiting
    pub fn submit_write(
        &mut self,
        registry: &mut ConnectionRegistry,
        req: &IoRequest,
        data: Bytes,
    ) -> NvmfResult<RequestHandle> {
        let len = self.check_io(registry, req, data.len())?;
        let command = NvmeCommand::Write {
            nsid: req.nsid,
            slba: req.start_lba,
            nlb: req.block_count,
            data: data.slice(..len),
        };
        self.submit_io(registry, req, command, IoDirection::Write)
    }

    fn submit_io(
        &mut self,
        registry: &mut ConnectionRegistry,
        req: &IoRequest,
        command: NvmeCommand,
        direction: IoDirection,
    ) -> NvmfResult<RequestHandle> {
        let request = self.next_request_id();
        let session = live_session(registry, &req.session)?;
        let (tracker, qpair) = session.io_parts().ok_or(NvmfError::SessionClosed)?;

        let submitted = match tracker.submit(qpair, request, command.clone()) {
            Err(SubmitError::QueueFull) => {
                // One reap may free slots held by reaped or abandoned commands
                tracker.reap(qpair).map_err(NvmfError::transport)?;
                tracker.submit(qpair, request, command)
            }
            other => other,
        };
        match submitted {
            Ok(()) => {}
            Err(SubmitError::QueueFull) => {
                return Err(NvmfError::OutOfResources(format!(
                    "I/O queue of session {} is full",
                    req.session
                )))
            }
            Err(SubmitError::Transport(e)) => return Err(NvmfError::transport(e)),
        }

        trace!("Session {}: request {} submitted", req.session, request);
        Ok(RequestHandle {
            session: req.session,
            request,
            direction,
        })
    }

    /// Poll an asynchronous request; `None` while it is still in flight
    pub fn poll(&mut self, registry: &mut ConnectionRegistry, handle: &RequestHandle) -> NvmfResult<Option<IoCompletion>> {
        let session = live_session(registry, &handle.session)?;
        if !session.io_tracks(handle.request) {
            return Err(NvmfError::NotFound(format!("request {}", handle.request)));
        }
        let (tracker, qpair) = session.io_parts().ok_or(NvmfError::SessionClosed)?;

        tracker.reap(qpair).map_err(NvmfError::transport)?;
        let Some(completion) = tracker.take(handle.request) else {
            return Ok(None);
        };

        let completion = check_status(completion)?;
        Ok(Some(IoCompletion {
            request: handle.request,
            data: match handle.direction {
                IoDirection::Read => completion.data,
                IoDirection::Write => None,
            },
        }))
    }

    /// Stop waiting for an asynchronous request
    pub fn abandon(&mut self, registry: &mut ConnectionRegistry, handle: &RequestHandle) -> NvmfResult<()> {
        let session = registry
            .find_mut(&handle.session)
            .ok_or(NvmfError::SessionClosed)?;
        let abandoned = match session.io_parts() {
            Some((tracker, _)) => tracker.abandon(handle.request),
            None => false,
        };
        if !abandoned {
            return Err(NvmfError::NotFound(format!("request {}", handle.request)));
        }
        Ok(())
    }

    /// Identify the controller (`nsid == 0`) or one of its namespaces
    pub fn identify(&mut self, registry: &mut ConnectionRegistry, key: &SessionKey, nsid: u32) -> NvmfResult<IdentifyResult> {
        let deadline = self.clock.now().saturating_add(self.admin_timeout_ms);
        let request = self.next_request_id();
        let clock = self.clock.clone();

        let session = registry
            .find_mut(key)
            .ok_or_else(|| NvmfError::NotFound(format!("session {}", key)))?;
        if !session.state().accepts_admin() {
            return Err(NvmfError::SessionClosed);
        }

        if nsid == 0 {
            let page = identify_page(session, clock.as_ref(), request, IdentifyCns::Controller, 0, deadline)?;
            return Ok(IdentifyResult::Controller(ControllerIdentify::parse(&page)?));
        }

        check_nsid(session, nsid)?;
        let page = identify_page(session, clock.as_ref(), request, IdentifyCns::Namespace, nsid, deadline)?;
        let namespace = NamespaceIdentify::parse(nsid, &page)?;
        session.cache_namespace(geometry_of(&namespace));
        Ok(IdentifyResult::Namespace(namespace))
    }

    /// Connected sessions in connect order
    pub fn list(registry: &ConnectionRegistry) -> impl Iterator<Item = SessionSummary> + '_ {
        registry.iter().map(|s| s.summary())
    }

    /// Namespaces exposed by connected sessions, session by session
    pub fn list_namespaces(registry: &ConnectionRegistry) -> impl Iterator<Item = NamespaceEntry> + '_ {
        registry.iter().flat_map(|s| {
            (1..=s.namespace_count).map(move |nsid| NamespaceEntry {
                session: s.key(),
                nsid,
                subsystem_nqn: s.subsystem_nqn.clone(),
                target: s.target,
                geometry: s.namespace(nsid).copied(),
            })
        })
    }

    /// Checks shared by every read and write; returns the transfer length
    fn check_io(&mut self, registry: &mut ConnectionRegistry, req: &IoRequest, available: usize) -> NvmfResult<usize> {
        let session = live_session(registry, &req.session)?;

        if req.block_count == 0 {
            return Err(NvmfError::InvalidParameter("block count is zero".into()));
        }
        let needed = req.data_len();
        if needed > available as u64 {
            return Err(NvmfError::BufferTooSmall { needed, available });
        }

        let geometry = match session.namespace(req.nsid) {
            Some(geometry) => *geometry,
            None => {
                check_nsid(session, req.nsid)?;
                let deadline = self.clock.now().saturating_add(self.admin_timeout_ms);
                let request = self.next_request_id();
                let page = identify_page(
                    session,
                    self.clock.as_ref(),
                    request,
                    IdentifyCns::Namespace,
                    req.nsid,
                    deadline,
                )?;
                let geometry = geometry_of(&NamespaceIdentify::parse(req.nsid, &page)?);
                session.cache_namespace(geometry);
                geometry
            }
        };

        if geometry.block_size != BLOCK_SIZE {
            return Err(NvmfError::InvalidParameter(format!(
                "namespace {} uses {}-byte blocks, only {} is supported",
                req.nsid, geometry.block_size, BLOCK_SIZE
            )));
        }

        let in_range = req
            .start_lba
            .checked_add(req.block_count as u64)
            .is_some_and(|end| end <= geometry.capacity_blocks);
        if !in_range {
            return Err(NvmfError::InvalidParameter(format!(
                "blocks {}..+{} outside namespace {} of {} blocks",
                req.start_lba, req.block_count, req.nsid, geometry.capacity_blocks
            )));
        }

        Ok(needed as usize)
    }

    fn execute_io(
        &self,
        registry: &mut ConnectionRegistry,
        key: &SessionKey,
        request: RequestId,
        command: NvmeCommand,
        deadline: u64,
    ) -> NvmfResult<Completion> {
        let session = live_session(registry, key)?;
        let (tracker, qpair) = session.io_parts().ok_or(NvmfError::SessionClosed)?;
        let completion = run_to_completion(tracker, qpair, self.clock.as_ref(), request, command, deadline)
            .inspect_err(|e| debug!("Session {}: request {} failed: {}", key, request, e))?;
        check_status(completion)
    }
}

/// Session that currently accepts I/O
fn live_session<'a>(registry: &'a mut ConnectionRegistry, key: &SessionKey) -> NvmfResult<&'a mut ControllerSession> {
    let session = registry.find_mut(key).ok_or(NvmfError::SessionClosed)?;
    if !session.state().accepts_io() {
        return Err(NvmfError::SessionClosed);
    }
    Ok(session)
}

fn check_nsid(session: &ControllerSession, nsid: u32) -> NvmfResult<()> {
    if nsid == 0 || nsid > session.namespace_count {
        return Err(NvmfError::InvalidParameter(format!(
            "namespace {} not in 1..={}",
            nsid, session.namespace_count
        )));
    }
    Ok(())
}

fn geometry_of(namespace: &NamespaceIdentify) -> NamespaceGeometry {
    NamespaceGeometry {
        nsid: namespace.nsid,
        capacity_blocks: namespace.capacity_blocks,
        block_size: namespace.block_size(),
    }
}

fn check_status(completion: Completion) -> NvmfResult<Completion> {
    if completion.status.is_success() {
        Ok(completion)
    } else {
        Err(NvmfError::MediaError {
            status: completion.status.0,
        })
    }
}

fn identify_page(
    session: &mut ControllerSession,
    clock: &dyn TickSource,
    request: RequestId,
    cns: IdentifyCns,
    nsid: u32,
    deadline: u64,
) -> NvmfResult<Bytes> {
    let (tracker, qpair) = session.admin_parts();
    let completion = check_status(run_to_completion(
        tracker,
        qpair,
        clock,
        request,
        NvmeCommand::Identify { cns, nsid },
        deadline,
    )?)?;
    completion
        .data
        .ok_or_else(|| NvmfError::TransportError("identify returned no data".into()))
}

/// Submit a command and poll until its completion is released in order
fn run_to_completion(
    tracker: &mut CommandTracker,
    qpair: &mut dyn QueuePair,
    clock: &dyn TickSource,
    request: RequestId,
    command: NvmeCommand,
    deadline: u64,
) -> NvmfResult<Completion> {
    // Wait for a slot; reaping releases slots of finished commands
    loop {
        match tracker.submit(qpair, request, command.clone()) {
            Ok(()) => break,
            Err(SubmitError::QueueFull) => {
                if clock.now() >= deadline {
                    return Err(NvmfError::Timeout);
                }
                tracker.reap(qpair).map_err(NvmfError::transport)?;
            }
            Err(SubmitError::Transport(e)) => return Err(NvmfError::transport(e)),
        }
    }

    loop {
        if let Err(e) = tracker.reap(qpair) {
            tracker.abandon(request);
            return Err(NvmfError::transport(e));
        }
        if let Some(completion) = tracker.take(request) {
            return Ok(completion);
        }
        if clock.now() >= deadline {
            tracker.abandon(request);
            warn!("Request {} abandoned after timeout", request);
            return Err(NvmfError::Timeout);
        }
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTicks;
    use crate::session::{ConnectCommand, SessionManager};
    use crate::transport::{CompletionStatus, LoopbackFabric};
    use nvmf_shared::GlobalConfig;

    const NQN: &str = "nvmet-test";

    struct Harness {
        fabric: LoopbackFabric,
        manager: SessionManager,
        dispatcher: CommandDispatcher,
        key: SessionKey,
    }

    async fn harness(clock: ManualTicks) -> Harness {
        harness_with_config(clock, InitiatorConfig::default()).await
    }

    async fn harness_with_config(clock: ManualTicks, config: InitiatorConfig) -> Harness {
        let fabric = LoopbackFabric::new();
        fabric.add_subsystem("192.168.100.29:4420".parse().unwrap(), NQN, &[10, 64]);
        let clock = Arc::new(clock);
        let mut manager = SessionManager::new(Arc::new(fabric.clone()), clock.clone(), config.clone());
        let key = manager
            .connect(&ConnectCommand::new("192.168.100.29", 4420, NQN), &GlobalConfig::default())
            .await
            .unwrap();
        let dispatcher = CommandDispatcher::new(clock.clone(), &config);
        Harness {
            fabric,
            manager,
            dispatcher,
            key,
        }
    }

    #[tokio::test]
    async fn test_write_then_read_back() {
        let mut h = harness(ManualTicks::new(0)).await;
        let req = IoRequest::new(h.key, 2, 4, 2);
        let data: Vec<u8> = (0..1024).map(|i| (i % 251) as u8).collect();

        h.dispatcher.write(h.manager.registry_mut(), &req, &data).unwrap();
        let mut buf = vec![0u8; 1024];
        h.dispatcher.read(h.manager.registry_mut(), &req, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[tokio::test]
    async fn test_buffer_too_small_never_reaches_transport() {
        let mut h = harness(ManualTicks::new(0)).await;
        let mut buf = vec![0u8; 512];
        let req = IoRequest::new(h.key, 1, 0, 2);

        let result = h.dispatcher.read(h.manager.registry_mut(), &req, &mut buf);
        assert_eq!(
            result,
            Err(NvmfError::BufferTooSmall {
                needed: 1024,
                available: 512
            })
        );
        assert_eq!(h.fabric.stats().io_commands, 0);
        assert_eq!(h.fabric.stats().identifies, 0);
    }

    #[tokio::test]
    async fn test_read_past_namespace_end_rejected() {
        let mut h = harness(ManualTicks::new(0)).await;
        let mut buf = vec![0u8; 20 * 512];
        let req = IoRequest::new(h.key, 1, 0, 20);

        let result = h.dispatcher.read(h.manager.registry_mut(), &req, &mut buf);
        assert!(matches!(result, Err(NvmfError::InvalidParameter(_))));
        assert_eq!(h.fabric.stats().io_commands, 0);

        // Geometry is cached after the first identify
        let session = h.manager.registry().find(&h.key).unwrap();
        assert_eq!(session.namespace(1).map(|g| g.capacity_blocks), Some(10));
    }

    #[tokio::test]
    async fn test_zero_blocks_and_bad_nsid() {
        let mut h = harness(ManualTicks::new(0)).await;
        let mut buf = vec![0u8; 512];

        let zero = IoRequest::new(h.key, 1, 0, 0);
        assert!(matches!(
            h.dispatcher.read(h.manager.registry_mut(), &zero, &mut buf),
            Err(NvmfError::InvalidParameter(_))
        ));

        let bad_ns = IoRequest::new(h.key, 3, 0, 1);
        assert!(matches!(
            h.dispatcher.read(h.manager.registry_mut(), &bad_ns, &mut buf),
            Err(NvmfError::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_media_error_surfaces_status() {
        let mut h = harness(ManualTicks::new(0)).await;
        h.fabric
            .configure(|b| b.io_status = Some(CompletionStatus::UNRECOVERED_READ));
        let mut buf = vec![0u8; 512];

        let result = h.dispatcher.read(h.manager.registry_mut(), &IoRequest::new(h.key, 1, 0, 1), &mut buf);
        assert_eq!(result, Err(NvmfError::MediaError { status: 0x0281 }));
    }

    #[tokio::test]
    async fn test_sync_timeout_abandons_command() {
        let mut h = harness(ManualTicks::stepping(0, 1000)).await;
        let req = IoRequest::new(h.key, 1, 0, 1);
        let mut buf = vec![0u8; 512];

        // Learn geometry before stalling
        h.dispatcher.identify(h.manager.registry_mut(), &h.key, 1).unwrap();
        h.fabric.configure(|b| b.stall_io = true);
        assert_eq!(h.dispatcher.read(h.manager.registry_mut(), &req, &mut buf), Err(NvmfError::Timeout));

        // The late completion is discarded and the next read succeeds
        h.fabric.configure(|b| b.stall_io = false);
        assert!(h.dispatcher.read(h.manager.registry_mut(), &req, &mut buf).is_ok());
        let session = h.manager.registry_mut().find_mut(&h.key).unwrap();
        let (tracker, _) = session.io_parts().unwrap();
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_async_completions_in_submission_order() {
        let mut h = harness(ManualTicks::new(0)).await;
        h.dispatcher.identify(h.manager.registry_mut(), &h.key, 2).unwrap();
        h.fabric.configure(|b| b.reverse_completions = true);

        let first = h
            .dispatcher
            .submit_write(h.manager.registry_mut(), &IoRequest::new(h.key, 2, 0, 1), Bytes::from(vec![7u8; 512]))
            .unwrap();
        let second = h
            .dispatcher
            .submit_read(h.manager.registry_mut(), &IoRequest::new(h.key, 2, 0, 1))
            .unwrap();

        // The transport completes `second` first; it is held back
        let done = h.dispatcher.poll(h.manager.registry_mut(), &first).unwrap();
        assert_eq!(done, Some(IoCompletion { request: first.request, data: None }));

        let done = h.dispatcher.poll(h.manager.registry_mut(), &second).unwrap().unwrap();
        assert_eq!(done.data, Some(Bytes::from(vec![7u8; 512])));
    }

    #[tokio::test]
    async fn test_poll_before_completion() {
        let mut h = harness(ManualTicks::new(0)).await;
        h.dispatcher.identify(h.manager.registry_mut(), &h.key, 1).unwrap();
        h.fabric.configure(|b| b.completion_delay_polls = 1);

        let handle = h
            .dispatcher
            .submit_read(h.manager.registry_mut(), &IoRequest::new(h.key, 1, 0, 1))
            .unwrap();
        assert_eq!(h.dispatcher.poll(h.manager.registry_mut(), &handle).unwrap(), None);
        assert!(h.dispatcher.poll(h.manager.registry_mut(), &handle).unwrap().is_some());
        assert!(matches!(
            h.dispatcher.poll(h.manager.registry_mut(), &handle),
            Err(NvmfError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_blocks_io_until_reestablished() {
        let mut h = harness(ManualTicks::new(0)).await;
        let req = IoRequest::new(h.key, 1, 0, 1);
        let mut buf = vec![0u8; 512];

        h.manager.reset(&h.key).unwrap();
        assert_eq!(h.dispatcher.read(h.manager.registry_mut(), &req, &mut buf), Err(NvmfError::SessionClosed));
        // Admin commands still work on a reset controller
        assert!(h.dispatcher.identify(h.manager.registry_mut(), &h.key, 0).is_ok());

        h.manager.reestablish(&h.key).unwrap();
        assert!(h.dispatcher.read(h.manager.registry_mut(), &req, &mut buf).is_ok());
    }

    #[tokio::test]
    async fn test_identify_controller_and_namespace() {
        let mut h = harness(ManualTicks::new(0)).await;

        let IdentifyResult::Controller(ctrl) = h.dispatcher.identify(h.manager.registry_mut(), &h.key, 0).unwrap() else {
            panic!("expected controller data");
        };
        assert_eq!(ctrl.namespace_count, 2);

        let IdentifyResult::Namespace(ns) = h.dispatcher.identify(h.manager.registry_mut(), &h.key, 2).unwrap() else {
            panic!("expected namespace data");
        };
        assert_eq!(ns.size_blocks, 64);
        assert_eq!(ns.block_size(), 512);

        assert!(matches!(
            h.dispatcher.identify(h.manager.registry_mut(), &SessionKey::parse("ffffffff").unwrap(), 0),
            Err(NvmfError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_and_list_namespaces() {
        let mut h = harness(ManualTicks::new(0)).await;
        h.dispatcher.identify(h.manager.registry_mut(), &h.key, 1).unwrap();

        let sessions: Vec<_> = CommandDispatcher::list(h.manager.registry()).collect();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].subsystem_nqn, NQN);

        let namespaces: Vec<_> = CommandDispatcher::list_namespaces(h.manager.registry()).collect();
        assert_eq!(namespaces.len(), 2);
        assert_eq!(namespaces[0].geometry.map(|g| g.capacity_blocks), Some(10));
        assert_eq!(namespaces[1].geometry, None);

        // Restartable: a fresh call yields the same sequence
        assert_eq!(CommandDispatcher::list_namespaces(h.manager.registry()).count(), 2);

        h.manager.disconnect(&h.key).unwrap();
        assert_eq!(CommandDispatcher::list(h.manager.registry()).count(), 0);
    }

    #[tokio::test]
    async fn test_abandon_async_request() {
        let mut h = harness(ManualTicks::new(0)).await;
        h.dispatcher.identify(h.manager.registry_mut(), &h.key, 1).unwrap();
        h.fabric.configure(|b| b.stall_io = true);

        let handle = h
            .dispatcher
            .submit_read(h.manager.registry_mut(), &IoRequest::new(h.key, 1, 0, 1))
            .unwrap();
        assert_eq!(h.dispatcher.poll(h.manager.registry_mut(), &handle).unwrap(), None);
        h.dispatcher.abandon(h.manager.registry_mut(), &handle).unwrap();

        assert!(matches!(
            h.dispatcher.poll(h.manager.registry_mut(), &handle),
            Err(NvmfError::NotFound(_))
        ));
        assert!(matches!(
            h.dispatcher.abandon(h.manager.registry_mut(), &handle),
            Err(NvmfError::NotFound(_))
        ));

        // The late completion is reaped and dropped
        h.fabric.configure(|b| b.stall_io = false);
        let mut buf = vec![0u8; 512];
        let req = IoRequest::new(h.key, 1, 0, 1);
        assert!(h.dispatcher.read(h.manager.registry_mut(), &req, &mut buf).is_ok());
        let session = h.manager.registry_mut().find_mut(&h.key).unwrap();
        let (tracker, _) = session.io_parts().unwrap();
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_huge_timeouts_do_not_overflow() {
        let config = InitiatorConfig {
            io_timeout_ms: u64::MAX,
            admin_timeout_ms: u64::MAX,
            ..InitiatorConfig::default()
        };
        let mut h = harness_with_config(ManualTicks::new(5), config).await;
        let req = IoRequest::new(h.key, 1, 0, 1);

        h.dispatcher.write(h.manager.registry_mut(), &req, &[9u8; 512]).unwrap();
        let mut buf = vec![0u8; 512];
        h.dispatcher.read(h.manager.registry_mut(), &req, &mut buf).unwrap();
        assert_eq!(buf, vec![9u8; 512]);
        assert!(h.dispatcher.identify(h.manager.registry_mut(), &h.key, 0).is_ok());
    }

    #[tokio::test]
    async fn test_foreign_block_size_rejected() {
        let mut h = harness(ManualTicks::new(0)).await;
        h.fabric.configure(|b| b.lba_data_shift = Some(12));

        let IdentifyResult::Namespace(ns) = h.dispatcher.identify(h.manager.registry_mut(), &h.key, 1).unwrap() else {
            panic!("expected namespace data");
        };
        assert_eq!(ns.block_size(), 4096);

        let req = IoRequest::new(h.key, 1, 0, 1);
        let mut buf = vec![0u8; 512];
        assert!(matches!(
            h.dispatcher.read(h.manager.registry_mut(), &req, &mut buf),
            Err(NvmfError::InvalidParameter(_))
        ));
        assert!(matches!(
            h.dispatcher.write(h.manager.registry_mut(), &req, &buf),
            Err(NvmfError::InvalidParameter(_))
        ));
        assert!(matches!(
            h.dispatcher.submit_read(h.manager.registry_mut(), &req),
            Err(NvmfError::InvalidParameter(_))
        ));
        assert_eq!(h.fabric.stats().io_commands, 0);
    }
}
