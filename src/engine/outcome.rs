//! Per-message outcomes and the engine event stream.
//!
//! Every failure is reported as data so the loop can run unattended; nothing
//! on the dispatch path raises an uncaught fault.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::client::RejectCode;
use crate::engine::session::StopReason;

/// Broadcast channel capacity for event fan-out.
const EVENT_CAPACITY: usize = 256;

/// Which path produced a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Regular chunk inside a dispatch round.
    Auto,
    /// One-off user-initiated send.
    Manual,
    /// The single evasion retry after a rejection.
    Retry,
}

impl std::fmt::Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Manual => write!(f, "manual"),
            Self::Retry => write!(f, "retry"),
        }
    }
}

/// How the platform answered one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    Accepted,
    Rejected(RejectCode),
    /// Transport or precondition failure; no platform verdict.
    Failed(String),
}

/// Outcome of one outbound message. Not persisted, only reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub attempt: Attempt,
    /// Chunk text before substitution.
    pub original: String,
    /// Text actually sent, after substitution (and retry obfuscation).
    pub sent: String,
    pub result: SendResult,
}

impl SendOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.result, SendResult::Accepted)
    }

    /// Whether substitution changed the text, recorded for logging.
    pub fn replaced(&self) -> bool {
        self.original != self.sent
    }
}

/// Engine events, fanned out to subscribers and rendered into the bounded
/// log.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Started,
    Stopped { reason: StopReason },
    /// Input rejected locally before any network call.
    ValidationFailed { reason: String },
    Sent(SendOutcome),
    /// Rejection stands: the classifier found nothing to rewrite.
    EvasionUnresolved { text: String },
    RoundCompleted { round: u64, sent: usize },
    RulesSynced { rules: usize },
    RuleSyncFailed { error: String },
}

impl std::fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "dispatch started"),
            Self::Stopped { reason } => write!(f, "dispatch stopped: {reason}"),
            Self::ValidationFailed { reason } => write!(f, "rejected: {reason}"),
            Self::Sent(outcome) => {
                let text = if outcome.replaced() {
                    format!("{} -> {}", outcome.original, outcome.sent)
                } else {
                    outcome.sent.clone()
                };
                match &outcome.result {
                    SendResult::Accepted => write!(f, "{}: {} ok", outcome.attempt, text),
                    SendResult::Rejected(code) => {
                        write!(f, "{}: {} rejected: {}", outcome.attempt, text, code)
                    }
                    SendResult::Failed(error) => {
                        write!(f, "{}: {} failed: {}", outcome.attempt, text, error)
                    }
                }
            }
            Self::EvasionUnresolved { text } => {
                write!(f, "evasion unresolved, manual review needed: {text}")
            }
            Self::RoundCompleted { round, sent } => {
                write!(f, "round {round} completed ({sent} sent)")
            }
            Self::RulesSynced { rules } => write!(f, "remote rules synced ({rules} applicable)"),
            Self::RuleSyncFailed { error } => write!(f, "remote rule sync failed: {error}"),
        }
    }
}

/// Bounded in-memory event log plus broadcast fan-out.
///
/// Rendering is plain text; presenting it is the embedding application's
/// concern.
pub struct EventLog {
    max_lines: Mutex<usize>,
    lines: Mutex<VecDeque<String>>,
    tx: broadcast::Sender<EngineEvent>,
}

impl EventLog {
    pub fn new(max_lines: usize) -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            max_lines: Mutex::new(max_lines.max(1)),
            lines: Mutex::new(VecDeque::new()),
            tx,
        }
    }

    /// Record and broadcast one event. Never blocks and never fails; a full
    /// broadcast channel only drops laggards.
    pub fn emit(&self, event: EngineEvent) {
        let line = event.to_string();
        let max = *self.max_lines.lock().expect("event log poisoned");
        {
            let mut lines = self.lines.lock().expect("event log poisoned");
            while lines.len() >= max {
                lines.pop_front();
            }
            lines.push_back(line);
        }
        let _ = self.tx.send(event);
    }

    /// Subscribe to live events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Snapshot of the retained log lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .expect("event log poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Adjust retention; takes effect on the next emit.
    pub fn set_max_lines(&self, max_lines: usize) {
        *self.max_lines.lock().expect("event log poisoned") = max_lines.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(result: SendResult) -> SendOutcome {
        SendOutcome {
            attempt: Attempt::Auto,
            original: "hi".into(),
            sent: "hi".into(),
            result,
        }
    }

    #[test]
    fn log_is_bounded() {
        let log = EventLog::new(3);
        for _ in 0..10 {
            log.emit(EngineEvent::Started);
        }
        assert_eq!(log.lines().len(), 3);
    }

    #[test]
    fn emit_reaches_subscribers() {
        let log = EventLog::new(10);
        let mut rx = log.subscribe();
        log.emit(EngineEvent::Sent(outcome(SendResult::Accepted)));
        match rx.try_recv().unwrap() {
            EngineEvent::Sent(o) => assert!(o.succeeded()),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn replaced_outcomes_render_both_texts() {
        let rendered = EngineEvent::Sent(SendOutcome {
            attempt: Attempt::Auto,
            original: "AB".into(),
            sent: "CC".into(),
            result: SendResult::Rejected(RejectCode::new("f")),
        })
        .to_string();
        assert!(rendered.contains("AB -> CC"));
        assert!(rendered.contains("global blocklist"));
    }

    #[test]
    fn shrinking_retention_applies_on_next_emit() {
        let log = EventLog::new(10);
        for _ in 0..10 {
            log.emit(EngineEvent::Started);
        }
        log.set_max_lines(2);
        log.emit(EngineEvent::Started);
        assert_eq!(log.lines().len(), 2);
    }
}
