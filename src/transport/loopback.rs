//! In-memory loopback fabric
//!
//! Simulates remote NVMe-oF subsystems so the session layer can run without
//! a wire transport: development, demos and tests. Behaviour knobs let a
//! caller inject handshake delays, rejections, stalled or reordered
//! completions and failing resets.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use nvmf_shared::timing::BLOCK_SIZE;
use tracing::{debug, trace};

use super::command::{CommandId, Completion, CompletionStatus, IdentifyCns, NvmeCommand};
use super::traits::{
    FabricConnector, FabricController, HandshakeParams, QueuePair, SubmitError, TransportFailure,
    TransportKind,
};
use crate::command::identify::{ControllerIdentify, NamespaceIdentify};

/// Admin queue depth of simulated controllers
pub const LOOPBACK_ADMIN_DEPTH: usize = 4;

/// Behaviour knobs of the simulated fabric
#[derive(Debug, Clone, Default)]
pub struct LoopbackBehavior {
    /// Delay before the handshake answers
    pub handshake_delay: Duration,
    /// Refuse every handshake
    pub reject_connect: bool,
    /// Polls a command stays in flight before it completes
    pub completion_delay_polls: u32,
    /// Complete ready I/O commands in reverse submission order
    pub reverse_completions: bool,
    /// Never complete I/O commands
    pub stall_io: bool,
    /// Never complete admin commands
    pub stall_admin: bool,
    /// Complete I/O commands with this status instead of executing them
    pub io_status: Option<CompletionStatus>,
    /// Fail controller resets
    pub fail_reset: bool,
    /// Fail I/O queue creation
    pub fail_io_queue: bool,
    /// LBA data size shift reported by Identify Namespace instead of 512 bytes
    pub lba_data_shift: Option<u8>,
}

/// Counters of what the simulated fabric has seen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    pub handshakes: u32,
    pub live_controllers: u32,
    pub live_io_queues: u32,
    pub keep_alives: u32,
    pub identifies: u32,
    pub io_commands: u32,
    pub resets: u32,
}

struct LoopbackNamespace {
    nsid: u32,
    blocks: u64,
    data: Vec<u8>,
}

struct ControllerState {
    subsystem: (SocketAddr, String),
    /// Bumped on reset; I/O queues of older generations are dead
    generation: u32,
}

#[derive(Default)]
struct FabricState {
    subsystems: HashMap<(SocketAddr, String), Vec<LoopbackNamespace>>,
    controllers: HashMap<u16, ControllerState>,
    behavior: LoopbackBehavior,
    stats: LoopbackStats,
    next_cntlid: u16,
}

type SharedState = Arc<Mutex<FabricState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, FabricState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Simulated NVMe-oF fabric hosting any number of subsystems
#[derive(Clone, Default)]
pub struct LoopbackFabric {
    state: SharedState,
}

impl LoopbackFabric {
    /// Create an empty fabric
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose a subsystem at `target` with namespaces of the given block counts
    pub fn add_subsystem(&self, target: SocketAddr, nqn: impl Into<String>, namespace_blocks: &[u64]) {
        let namespaces = namespace_blocks
            .iter()
            .enumerate()
            .map(|(i, &blocks)| LoopbackNamespace {
                nsid: i as u32 + 1,
                blocks,
                data: vec![0u8; (blocks * BLOCK_SIZE) as usize],
            })
            .collect();

        lock(&self.state)
            .subsystems
            .insert((target, nqn.into()), namespaces);
    }

    /// Adjust the simulated behaviour
    pub fn configure(&self, f: impl FnOnce(&mut LoopbackBehavior)) {
        f(&mut lock(&self.state).behavior);
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> LoopbackStats {
        lock(&self.state).stats.clone()
    }
}

#[async_trait]
impl FabricConnector for LoopbackFabric {
    async fn connect(
        &self,
        params: &HandshakeParams,
    ) -> Result<Box<dyn FabricController>, TransportFailure> {
        let delay = lock(&self.state).behavior.handshake_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        state.stats.handshakes += 1;

        if state.behavior.reject_connect {
            return Err(TransportFailure::Rejected("connect refused".into()));
        }

        let listening = state.subsystems.keys().any(|(addr, _)| *addr == params.target);
        if !listening {
            return Err(TransportFailure::Unreachable(format!(
                "no listener at {}",
                params.target
            )));
        }

        let subsystem = (params.target, params.subsystem_nqn.clone());
        let namespace_count = match state.subsystems.get(&subsystem) {
            Some(namespaces) => namespaces.len() as u32,
            None => {
                return Err(TransportFailure::Rejected(format!(
                    "subsystem {} not found",
                    params.subsystem_nqn
                )));
            }
        };

        state.next_cntlid = state.next_cntlid.wrapping_add(1).max(1);
        let cntlid = state.next_cntlid;
        state.controllers.insert(
            cntlid,
            ControllerState {
                subsystem,
                generation: 0,
            },
        );
        state.stats.live_controllers += 1;

        debug!(
            "Loopback: {} associated with {} as controller {}",
            params.host_nqn, params.subsystem_nqn, cntlid
        );

        Ok(Box::new(LoopbackController {
            admin: LoopbackQueuePair::new(self.state.clone(), cntlid, None, LOOPBACK_ADMIN_DEPTH),
            state: self.state.clone(),
            cntlid,
            namespace_count,
        }))
    }

    fn supports(&self, kind: TransportKind) -> bool {
        matches!(kind, TransportKind::Tcp | TransportKind::Rdma)
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

/// Simulated controller association
pub struct LoopbackController {
    state: SharedState,
    cntlid: u16,
    namespace_count: u32,
    admin: LoopbackQueuePair,
}

impl FabricController for LoopbackController {
    fn controller_id(&self) -> u16 {
        self.cntlid
    }

    fn namespace_count(&self) -> u32 {
        self.namespace_count
    }

    fn admin_queue(&mut self) -> &mut dyn QueuePair {
        &mut self.admin
    }

    fn create_io_queue(&mut self, depth: u16) -> Result<Box<dyn QueuePair>, TransportFailure> {
        let mut state = lock(&self.state);
        if state.behavior.fail_io_queue {
            return Err(TransportFailure::QueueFailed("create I/O queue refused".into()));
        }
        let generation = state
            .controllers
            .get(&self.cntlid)
            .map(|c| c.generation)
            .ok_or_else(|| TransportFailure::QueueFailed("controller gone".into()))?;
        state.stats.live_io_queues += 1;
        drop(state);

        Ok(Box::new(LoopbackQueuePair::new(
            self.state.clone(),
            self.cntlid,
            Some(generation),
            depth.max(1) as usize,
        )))
    }

    fn reset(&mut self) -> Result<(), TransportFailure> {
        let mut state = lock(&self.state);
        if state.behavior.fail_reset {
            return Err(TransportFailure::QueueFailed("controller reset failed".into()));
        }
        if let Some(controller) = state.controllers.get_mut(&self.cntlid) {
            controller.generation += 1;
        }
        state.stats.resets += 1;
        Ok(())
    }

    fn release(self: Box<Self>) {
        let mut state = lock(&self.state);
        if state.controllers.remove(&self.cntlid).is_some() {
            state.stats.live_controllers -= 1;
        }
        debug!("Loopback: controller {} released", self.cntlid);
    }
}

struct PendingEntry {
    cid: CommandId,
    command: NvmeCommand,
    polls_left: u32,
}

/// Simulated queue pair; admin when `generation` is None
pub struct LoopbackQueuePair {
    state: SharedState,
    cntlid: u16,
    generation: Option<u32>,
    depth: usize,
    next_cid: CommandId,
    pending: VecDeque<PendingEntry>,
}

impl LoopbackQueuePair {
    fn new(state: SharedState, cntlid: u16, generation: Option<u32>, depth: usize) -> Self {
        Self {
            state,
            cntlid,
            generation,
            depth,
            next_cid: 0,
            pending: VecDeque::new(),
        }
    }

    fn is_admin(&self) -> bool {
        self.generation.is_none()
    }

    fn check_alive(&self, state: &FabricState) -> Result<(), TransportFailure> {
        let controller = state
            .controllers
            .get(&self.cntlid)
            .ok_or_else(|| TransportFailure::QueueFailed("controller gone".into()))?;
        match self.generation {
            Some(generation) if generation != controller.generation => Err(
                TransportFailure::QueueFailed("I/O queue deleted by controller reset".into()),
            ),
            _ => Ok(()),
        }
    }

    fn allocate_cid(&mut self) -> CommandId {
        loop {
            let cid = self.next_cid;
            self.next_cid = self.next_cid.wrapping_add(1);
            if !self.pending.iter().any(|p| p.cid == cid) {
                return cid;
            }
        }
    }

    fn stalled(&self, behavior: &LoopbackBehavior) -> bool {
        if self.is_admin() {
            behavior.stall_admin
        } else {
            behavior.stall_io
        }
    }
}

impl QueuePair for LoopbackQueuePair {
    fn submit(&mut self, command: NvmeCommand) -> Result<CommandId, SubmitError> {
        let state_handle = self.state.clone();
        let mut state = lock(&state_handle);
        self.check_alive(&state)?;

        if command.is_admin() != self.is_admin() {
            return Err(SubmitError::Transport(TransportFailure::QueueFailed(format!(
                "opcode {:#04x} submitted on the wrong queue",
                command.opcode()
            ))));
        }
        if self.pending.len() >= self.depth {
            return Err(SubmitError::QueueFull);
        }

        match &command {
            NvmeCommand::KeepAlive => state.stats.keep_alives += 1,
            NvmeCommand::Identify { .. } => state.stats.identifies += 1,
            _ => state.stats.io_commands += 1,
        }

        let polls_left = state.behavior.completion_delay_polls;
        drop(state);

        let cid = self.allocate_cid();
        trace!("Loopback: cid {} opcode {:#04x} submitted", cid, command.opcode());
        self.pending.push_back(PendingEntry {
            cid,
            command,
            polls_left,
        });
        Ok(cid)
    }

    fn process_completions(&mut self, max: usize) -> Result<Vec<Completion>, TransportFailure> {
        let state_handle = self.state.clone();
        let mut state = lock(&state_handle);
        self.check_alive(&state)?;

        if self.stalled(&state.behavior) {
            return Ok(Vec::new());
        }

        let limit = if max == 0 { usize::MAX } else { max };
        let mut ready = Vec::new();
        let mut still_pending = VecDeque::with_capacity(self.pending.len());

        while let Some(mut entry) = self.pending.pop_front() {
            if entry.polls_left == 0 && ready.len() < limit {
                ready.push(entry);
            } else {
                entry.polls_left = entry.polls_left.saturating_sub(1);
                still_pending.push_back(entry);
            }
        }
        self.pending = still_pending;

        let reverse = state.behavior.reverse_completions && !self.is_admin();
        let subsystem = state
            .controllers
            .get(&self.cntlid)
            .map(|c| c.subsystem.clone())
            .ok_or_else(|| TransportFailure::QueueFailed("controller gone".into()))?;
        let cntlid = self.cntlid;

        // Commands execute in submission order; only delivery is reordered
        let mut completions: Vec<Completion> = ready
            .into_iter()
            .map(|entry| execute(&mut state, &subsystem, cntlid, entry))
            .collect();
        if reverse {
            completions.reverse();
        }
        Ok(completions)
    }

    fn outstanding(&self) -> usize {
        self.pending.len()
    }

    fn release(self: Box<Self>) {
        if !self.is_admin() {
            let mut state = lock(&self.state);
            state.stats.live_io_queues = state.stats.live_io_queues.saturating_sub(1);
        }
    }
}

fn execute(
    state: &mut FabricState,
    subsystem: &(SocketAddr, String),
    cntlid: u16,
    entry: PendingEntry,
) -> Completion {
    let cid = entry.cid;
    let io_status = state.behavior.io_status;
    let lba_data_shift = state
        .behavior
        .lba_data_shift
        .unwrap_or(BLOCK_SIZE.trailing_zeros() as u8);
    let namespaces = match state.subsystems.get_mut(subsystem) {
        Some(namespaces) => namespaces,
        None => return Completion::failed(cid, CompletionStatus::INVALID_FIELD),
    };

    match entry.command {
        NvmeCommand::KeepAlive => Completion::success(cid, None),

        NvmeCommand::Identify {
            cns: IdentifyCns::Controller,
            ..
        } => {
            let identify = ControllerIdentify {
                vendor_id: 0x1b36,
                serial_number: format!("LOOP{:08X}", cntlid),
                model_number: "Loopback NVMe-oF Controller".into(),
                firmware_revision: "1.0".into(),
                controller_id: cntlid,
                namespace_count: namespaces.len() as u32,
            };
            Completion::success(cid, Some(identify.to_page()))
        }

        NvmeCommand::Identify {
            cns: IdentifyCns::Namespace,
            nsid,
        } => match namespaces.iter().find(|ns| ns.nsid == nsid) {
            Some(ns) => {
                let mut nguid = [0u8; 16];
                nguid[..4].copy_from_slice(&nsid.to_be_bytes());
                nguid[4..6].copy_from_slice(&cntlid.to_be_bytes());
                let identify = NamespaceIdentify {
                    nsid,
                    size_blocks: ns.blocks,
                    capacity_blocks: ns.blocks,
                    utilization_blocks: ns.blocks,
                    lba_data_shift,
                    nguid,
                };
                Completion::success(cid, Some(identify.to_page()))
            }
            None => Completion::failed(cid, CompletionStatus::INVALID_NAMESPACE),
        },

        _ if io_status.is_some() => {
            Completion::failed(cid, io_status.unwrap_or(CompletionStatus::INVALID_FIELD))
        }

        NvmeCommand::Read { nsid, slba, nlb } => {
            match block_span(namespaces, nsid, slba, nlb) {
                Ok((ns, start, end)) => {
                    Completion::success(cid, Some(Bytes::copy_from_slice(&ns.data[start..end])))
                }
                Err(status) => Completion::failed(cid, status),
            }
        }

        NvmeCommand::Write {
            nsid,
            slba,
            nlb,
            data,
        } => match block_span(namespaces, nsid, slba, nlb) {
            Ok((ns, start, end)) if data.len() == end - start => {
                ns.data[start..end].copy_from_slice(&data);
                Completion::success(cid, None)
            }
            Ok(_) => Completion::failed(cid, CompletionStatus::INVALID_FIELD),
            Err(status) => Completion::failed(cid, status),
        },
    }
}

fn block_span(
    namespaces: &mut [LoopbackNamespace],
    nsid: u32,
    slba: u64,
    nlb: u32,
) -> Result<(&mut LoopbackNamespace, usize, usize), CompletionStatus> {
    let ns = namespaces
        .iter_mut()
        .find(|ns| ns.nsid == nsid)
        .ok_or(CompletionStatus::INVALID_NAMESPACE)?;
    let end_lba = slba
        .checked_add(nlb as u64)
        .filter(|&end| end <= ns.blocks)
        .ok_or(CompletionStatus::LBA_OUT_OF_RANGE)?;
    let start = (slba * BLOCK_SIZE) as usize;
    let end = (end_lba * BLOCK_SIZE) as usize;
    Ok((ns, start, end))
}
