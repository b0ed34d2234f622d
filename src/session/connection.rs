//! Individual controller session handling

use std::collections::HashMap;
use std::net::SocketAddr;

use nvmf_shared::state_machine::{SessionEvent, SessionState, SessionStateMachine, TransitionResult};
use tracing::{debug, warn};

use super::key::SessionKey;
use super::queue::CommandTracker;
use crate::transport::{FabricController, QueuePair};

/// Upper bound on reap passes while draining a queue at teardown
const DRAIN_POLL_LIMIT: usize = 64;

/// Keep-alive bookkeeping of one session
#[derive(Debug, Clone)]
pub struct KeepAliveTimer {
    pub interval: u64,
    pub next_deadline: u64,
    /// Deadlines passed without getting a keep-alive onto the admin queue
    pub consecutive_skips: u32,
}

impl KeepAliveTimer {
    pub fn new(now: u64, interval: u64) -> Self {
        Self {
            interval,
            next_deadline: now.saturating_add(interval),
            consecutive_skips: 0,
        }
    }

    pub fn is_due(&self, now: u64) -> bool {
        now >= self.next_deadline
    }
}

/// Namespace geometry learned through Identify Namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceGeometry {
    pub nsid: u32,
    pub capacity_blocks: u64,
    pub block_size: u64,
}

/// An I/O queue pair and its tracker
pub struct IoQueue {
    qpair: Box<dyn QueuePair>,
    tracker: CommandTracker,
}

impl IoQueue {
    pub fn new(qpair: Box<dyn QueuePair>) -> Self {
        Self {
            qpair,
            tracker: CommandTracker::new(),
        }
    }

    fn release(mut self, key: &SessionKey) {
        drain(key, "I/O", &mut self.tracker, self.qpair.as_mut());
        self.qpair.release();
    }
}

/// Read-only view of a session for enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub key: SessionKey,
    pub attempt: Option<String>,
    pub target: SocketAddr,
    pub subsystem_nqn: String,
    pub host_nqn: String,
    pub controller_id: u16,
    pub namespace_count: u32,
    pub state: SessionState,
}

/// A live association with a remote controller
pub struct ControllerSession {
    key: SessionKey,
    controller: Box<dyn FabricController>,
    admin: CommandTracker,
    io: Option<IoQueue>,
    lifecycle: SessionStateMachine,
    namespaces: HashMap<u32, NamespaceGeometry>,
    pub target: SocketAddr,
    pub subsystem_nqn: String,
    pub host_nqn: String,
    pub attempt: Option<String>,
    pub controller_id: u16,
    pub namespace_count: u32,
    pub keep_alive: KeepAliveTimer,
}

/// Everything a session is built from once the handshake succeeded
pub struct SessionParts {
    pub controller: Box<dyn FabricController>,
    pub io: Box<dyn QueuePair>,
    pub target: SocketAddr,
    pub subsystem_nqn: String,
    pub host_nqn: String,
    pub attempt: Option<String>,
    pub keep_alive: KeepAliveTimer,
}

impl ControllerSession {
    /// Build a live session from a completed handshake
    pub fn new(key: SessionKey, parts: SessionParts) -> Self {
        let mut lifecycle = SessionStateMachine::new();
        lifecycle.process_event(SessionEvent::HandshakeComplete);

        Self {
            key,
            controller_id: parts.controller.controller_id(),
            namespace_count: parts.controller.namespace_count(),
            controller: parts.controller,
            admin: CommandTracker::new(),
            io: Some(IoQueue::new(parts.io)),
            lifecycle,
            namespaces: HashMap::new(),
            target: parts.target,
            subsystem_nqn: parts.subsystem_nqn,
            host_nqn: parts.host_nqn,
            attempt: parts.attempt,
            keep_alive: parts.keep_alive,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            key: self.key,
            attempt: self.attempt.clone(),
            target: self.target,
            subsystem_nqn: self.subsystem_nqn.clone(),
            host_nqn: self.host_nqn.clone(),
            controller_id: self.controller_id,
            namespace_count: self.namespace_count,
            state: self.state(),
        }
    }

    /// Cached geometry of a namespace, if it has been identified
    pub fn namespace(&self, nsid: u32) -> Option<&NamespaceGeometry> {
        self.namespaces.get(&nsid)
    }

    pub(crate) fn cache_namespace(&mut self, geometry: NamespaceGeometry) {
        self.namespaces.insert(geometry.nsid, geometry);
    }

    /// Admin tracker together with the admin queue pair
    pub(crate) fn admin_parts(&mut self) -> (&mut CommandTracker, &mut dyn QueuePair) {
        (&mut self.admin, self.controller.admin_queue())
    }

    /// I/O tracker together with the I/O queue pair, if one exists
    pub(crate) fn io_parts(&mut self) -> Option<(&mut CommandTracker, &mut dyn QueuePair)> {
        let io = self.io.as_mut()?;
        let qpair: &mut dyn QueuePair = io.qpair.as_mut();
        Some((&mut io.tracker, qpair))
    }

    /// Whether the I/O tracker still knows the request
    pub(crate) fn io_tracks(&self, request: super::queue::RequestId) -> bool {
        self.io
            .as_ref()
            .is_some_and(|io| io.tracker.is_tracked(request))
    }

    pub(crate) fn controller_mut(&mut self) -> &mut dyn FabricController {
        self.controller.as_mut()
    }

    /// Record a successful controller reset
    ///
    /// The I/O queue pair died with the reset; requests on it are dropped.
    pub(crate) fn mark_reset(&mut self) {
        self.transition(SessionEvent::ControllerReset);
        if let Some(mut io) = self.io.take() {
            let dropped = io.tracker.clear();
            if dropped > 0 {
                warn!("Session {}: {} I/O requests dropped by reset", self.key, dropped);
            }
            io.qpair.release();
        }
    }

    /// Install a fresh I/O queue pair after a reset
    pub(crate) fn install_io_queue(&mut self, qpair: Box<dyn QueuePair>) {
        self.io = Some(IoQueue::new(qpair));
        self.transition(SessionEvent::QueuesReestablished);
    }

    fn transition(&mut self, event: SessionEvent) {
        if let TransitionResult::Invalid { from, event } = self.lifecycle.process_event(event) {
            warn!("Session {}: ignoring {:?} in state {:?}", self.key, event, from);
        }
    }

    /// Drain queues and release the controller handle
    pub(crate) fn release(mut self) {
        self.transition(SessionEvent::Disconnect);

        if let Some(io) = self.io.take() {
            io.release(&self.key);
        }
        let key = self.key;
        let (admin, qpair) = self.admin_parts();
        drain(&key, "admin", admin, qpair);

        self.controller.release();
    }
}

fn drain(key: &SessionKey, label: &str, tracker: &mut CommandTracker, qpair: &mut dyn QueuePair) {
    for _ in 0..DRAIN_POLL_LIMIT {
        if tracker.outstanding() == 0 {
            return;
        }
        if let Err(e) = tracker.reap(qpair) {
            debug!("Session {}: {} queue drain stopped: {}", key, label, e);
            break;
        }
    }
    if tracker.outstanding() > 0 {
        debug!(
            "Session {}: {} {} commands still outstanding at release",
            key,
            tracker.outstanding(),
            label
        );
    }
    tracker.clear();
}
