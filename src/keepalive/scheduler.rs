//! Keep-alive scheduler
//!
//! Every tick reaps each admin queue so discarded keep-alive completions
//! free their slots, then sends a keep-alive for every session whose
//! deadline has passed. A session without a free admin slot is skipped and
//! retried on the next tick; failures never change session state.

use tracing::{debug, trace, warn};

use crate::session::ConnectionRegistry;
use crate::transport::{NvmeCommand, SubmitError};

/// Consecutive skips after which a session is reported
pub const SKIP_WARN_THRESHOLD: u32 = 3;

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAliveReport {
    pub sent: usize,
    pub skipped: usize,
}

/// Sends fire-and-forget keep-alives on admin queues
#[derive(Debug)]
pub struct KeepAliveScheduler {
    warn_threshold: u32,
}

impl KeepAliveScheduler {
    pub fn new() -> Self {
        Self {
            warn_threshold: SKIP_WARN_THRESHOLD,
        }
    }

    /// Run one scheduling pass at tick `now`
    pub fn tick(&self, registry: &mut ConnectionRegistry, now: u64) -> KeepAliveReport {
        let mut report = KeepAliveReport::default();

        for session in registry.iter_mut() {
            let key = session.key();
            if !session.state().accepts_admin() {
                continue;
            }

            let (tracker, qpair) = session.admin_parts();
            if let Err(e) = tracker.reap(qpair) {
                debug!("Session {}: admin reap failed: {}", key, e);
            }

            if !session.keep_alive.is_due(now) {
                continue;
            }

            let (tracker, qpair) = session.admin_parts();
            match tracker.submit_detached(qpair, NvmeCommand::KeepAlive) {
                Ok(()) => {
                    trace!("Session {}: keep-alive sent at {}", key, now);
                    let timer = &mut session.keep_alive;
                    timer.next_deadline = now.saturating_add(timer.interval);
                    timer.consecutive_skips = 0;
                    report.sent += 1;
                }
                Err(e) => {
                    let timer = &mut session.keep_alive;
                    timer.consecutive_skips += 1;
                    report.skipped += 1;

                    match e {
                        SubmitError::QueueFull => {
                            debug!("Session {}: admin queue full, keep-alive skipped", key)
                        }
                        SubmitError::Transport(ref failure) => {
                            debug!("Session {}: keep-alive not sent: {}", key, failure)
                        }
                    }
                    if timer.consecutive_skips == self.warn_threshold {
                        warn!(
                            "Session {}: {} consecutive keep-alives skipped",
                            key, timer.consecutive_skips
                        );
                    }
                }
            }
        }

        report
    }
}

impl Default for KeepAliveScheduler {
    fn default() -> Self {
        Self::new()
    }
}
