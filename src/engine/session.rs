//! Session status state machine.

use serde::{Deserialize, Serialize};

/// Dispatch session status. `Idle` is both initial and re-entrant terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Idle,
    Running,
}

impl Status {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Why a running session returned to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Explicit stop request.
    Requested,
    /// The active template became empty since the session started.
    TemplateEmpty,
    /// The session credential is missing; the user must re-authenticate.
    AuthRequired,
    /// The room identity could not be resolved.
    RoomUnavailable,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "stop requested"),
            Self::TemplateEmpty => write!(f, "active template is empty"),
            Self::AuthRequired => write!(f, "authentication required"),
            Self::RoomUnavailable => write!(f, "room resolution failed"),
        }
    }
}

/// Per-session dispatch state. The dispatch loop is the only writer.
#[derive(Debug)]
pub struct Session {
    status: Status,
    round: u64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            status: Status::Idle,
            round: 0,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    /// Enter `Running`. Each start begins a fresh run: the round counter
    /// resets.
    pub fn start(&mut self) {
        self.status = Status::Running;
        self.round = 0;
    }

    pub fn stop(&mut self) {
        self.status = Status::Idle;
    }

    /// Record one completed pass over the chunk sequence. Returns the new
    /// round count.
    pub fn complete_round(&mut self) -> u64 {
        self.round += 1;
        self.round
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
