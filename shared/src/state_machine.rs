//! Session Lifecycle State Machine
//!
//! Defines the valid lifecycle transitions of a controller session.

/// Lifecycle state of a controller session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Handshake in progress, not yet registered
    #[default]
    Connecting,
    /// Admin and I/O queues usable
    Live,
    /// Controller was reset; I/O queues must be re-established before I/O
    QueuesNeedReinit,
    /// Torn down; no further commands accepted
    Closed,
}

impl SessionState {
    /// Whether I/O commands may be submitted in this state
    pub fn accepts_io(&self) -> bool {
        matches!(self, SessionState::Live)
    }

    /// Whether admin commands (identify, keep-alive) may be submitted
    pub fn accepts_admin(&self) -> bool {
        matches!(self, SessionState::Live | SessionState::QueuesNeedReinit)
    }
}

/// Events that drive session transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Fabric connect completed and the I/O queue exists
    HandshakeComplete,
    /// Controller-level reset succeeded
    ControllerReset,
    /// I/O queues were recreated after a reset
    QueuesReestablished,
    /// Disconnect requested by the owner
    Disconnect,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(SessionState),
    /// Transition was invalid from current state
    Invalid { from: SessionState, event: SessionEvent },
}

/// Lifecycle tracker for one session
#[derive(Debug, Default)]
pub struct SessionStateMachine {
    current_state: SessionState,
}

impl SessionStateMachine {
    /// Create a new state machine in Connecting state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.current_state
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: SessionEvent) -> TransitionResult {
        match self.get_next_state(event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    fn get_next_state(&self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent::*;
        use SessionState::*;

        match (self.current_state, event) {
            (Connecting, HandshakeComplete) => Some(Live),
            (Live, ControllerReset) => Some(QueuesNeedReinit),
            // A second reset before re-establishing is harmless
            (QueuesNeedReinit, ControllerReset) => Some(QueuesNeedReinit),
            (QueuesNeedReinit, QueuesReestablished) => Some(Live),

            (Closed, Disconnect) => None,
            (_, Disconnect) => Some(Closed),

            _ => None,
        }
    }
}
