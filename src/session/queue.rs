//! Per-queue-pair command tracking
//!
//! This module handles:
//! - Mapping caller request ids to transport command ids
//! - Delivering completions in submission order
//! - Discarding completions of abandoned and fire-and-forget commands
//!   while keeping their slots counted until the transport reaps them

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, trace};

use crate::transport::{CommandId, Completion, NvmeCommand, QueuePair, SubmitError, TransportFailure};

/// Caller-visible request identifier
pub type RequestId = u64;

#[derive(Debug)]
struct Inflight {
    request: RequestId,
    cid: CommandId,
}

/// Tracks commands outstanding on one queue pair
#[derive(Debug, Default)]
pub struct CommandTracker {
    /// Awaited commands in submission order
    inflight: VecDeque<Inflight>,
    /// Completions that arrived ahead of an earlier submission
    arrived: HashMap<CommandId, Completion>,
    /// Completions released in order, waiting for the caller
    ready: HashMap<RequestId, Completion>,
    /// Commands whose completion will be discarded on arrival
    discard: HashSet<CommandId>,
}

impl CommandTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a command whose completion the caller will collect
    pub fn submit(
        &mut self,
        qpair: &mut dyn QueuePair,
        request: RequestId,
        command: NvmeCommand,
    ) -> Result<(), SubmitError> {
        let cid = qpair.submit(command)?;
        self.inflight.push_back(Inflight { request, cid });
        Ok(())
    }

    /// Submit a command whose completion is discarded
    pub fn submit_detached(
        &mut self,
        qpair: &mut dyn QueuePair,
        command: NvmeCommand,
    ) -> Result<(), SubmitError> {
        let cid = qpair.submit(command)?;
        self.discard.insert(cid);
        Ok(())
    }

    /// Reap the queue pair and release completions in submission order
    pub fn reap(&mut self, qpair: &mut dyn QueuePair) -> Result<usize, TransportFailure> {
        let completions = qpair.process_completions(0)?;
        let reaped = completions.len();

        for completion in completions {
            if self.discard.remove(&completion.cid) {
                trace!("Discarding completion for cid {}", completion.cid);
                continue;
            }
            if !self.inflight.iter().any(|i| i.cid == completion.cid) {
                debug!("Completion for unknown cid {} dropped", completion.cid);
                continue;
            }
            self.arrived.insert(completion.cid, completion);
        }

        while let Some(front) = self.inflight.front() {
            let Some(completion) = self.arrived.remove(&front.cid) else {
                break;
            };
            if let Some(done) = self.inflight.pop_front() {
                self.ready.insert(done.request, completion);
            }
        }

        Ok(reaped)
    }

    /// Take the completion of a request once it has been released
    pub fn take(&mut self, request: RequestId) -> Option<Completion> {
        self.ready.remove(&request)
    }

    /// Whether the request is known and not yet collected
    pub fn is_tracked(&self, request: RequestId) -> bool {
        self.ready.contains_key(&request) || self.inflight.iter().any(|i| i.request == request)
    }

    /// Stop waiting for a request
    ///
    /// Its slot stays counted until the late completion is reaped, and it
    /// no longer holds back later completions.
    pub fn abandon(&mut self, request: RequestId) -> bool {
        if self.ready.remove(&request).is_some() {
            return true;
        }
        let Some(pos) = self.inflight.iter().position(|i| i.request == request) else {
            return false;
        };
        if let Some(abandoned) = self.inflight.remove(pos) {
            match self.arrived.remove(&abandoned.cid) {
                // Already here, just not yet released
                Some(_) => {}
                None => {
                    self.discard.insert(abandoned.cid);
                }
            }
        }
        true
    }

    /// Commands still holding a transport slot
    pub fn outstanding(&self) -> usize {
        self.inflight.len() + self.arrived.len() + self.discard.len()
    }

    /// Forget everything; used when the queue pair itself is gone
    pub fn clear(&mut self) -> usize {
        let dropped = self.inflight.len() + self.ready.len();
        self.inflight.clear();
        self.arrived.clear();
        self.ready.clear();
        self.discard.clear();
        dropped
    }
}
