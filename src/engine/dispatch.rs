//! The dispatch loop: one long-lived task iterating message chunks while the
//! session runs.
//!
//! Commands are drained at chunk boundaries only, so an in-flight network
//! call always completes before a stop takes effect. Chunks are re-resolved
//! from the current template and settings at the start of every round;
//! changes made mid-round apply from the next round on.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::{mpsc, watch};

use crate::client::{Platform, SendReply};
use crate::config::Settings;
use crate::engine::evasion::{EvasionRetrier, RetryDecision};
use crate::engine::outcome::{Attempt, EngineEvent, SendOutcome, SendResult};
use crate::engine::session::{Session, Status, StopReason};
use crate::engine::{Command, Shared};
use crate::error::{SendError, ValidationError};
use crate::text;

/// Display colors picked from uniformly when color randomization is on.
const COLOR_PALETTE: [&str; 11] = [
    "0xe33fff", "0x54eed8", "0x58c1de", "0x455ff6", "0x975ef9", "0xc35986", "0xff8c21",
    "0x00fffc", "0x7eff00", "0xffed4f", "0xff9800",
];

enum Flow {
    Continue,
    Shutdown,
}

pub(crate) struct DispatchLoop {
    shared: Arc<Shared>,
    platform: Arc<dyn Platform>,
    retrier: Option<EvasionRetrier>,
    commands: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<Status>,
    session: Session,
    /// Configured room identifier (short id or URL), resolved once.
    room: String,
    jitter_cap: Duration,
}

impl DispatchLoop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        shared: Arc<Shared>,
        platform: Arc<dyn Platform>,
        retrier: Option<EvasionRetrier>,
        commands: mpsc::UnboundedReceiver<Command>,
        status_tx: watch::Sender<Status>,
        room: String,
        jitter_cap: Duration,
    ) -> Self {
        Self {
            shared,
            platform,
            retrier,
            commands,
            status_tx,
            session: Session::new(),
            room,
            jitter_cap,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            if self.session.status().is_running() {
                if let Flow::Shutdown = self.run_round().await {
                    break;
                }
            } else {
                match self.commands.recv().await {
                    None => break,
                    Some(cmd) => {
                        if let Flow::Shutdown = self.handle_command(cmd).await {
                            break;
                        }
                    }
                }
            }
        }
        tracing::debug!("dispatch loop exited");
    }

    async fn handle_command(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::Start => self.handle_start(),
            Command::Stop => {
                if self.session.status().is_running() {
                    self.stop(StopReason::Requested);
                }
            }
            Command::SendOnce(text) => self.manual_send(text).await,
            Command::Shutdown => return Flow::Shutdown,
        }
        Flow::Continue
    }

    /// Start requires a non-empty active template; otherwise the request is
    /// rejected with no state change and no network call.
    fn handle_start(&mut self) {
        if self.session.status().is_running() {
            return;
        }
        let template = self.shared.templates.borrow().active_text().to_string();
        if template.trim().is_empty() {
            self.shared.log.emit(EngineEvent::ValidationFailed {
                reason: ValidationError::EmptyTemplate.to_string(),
            });
            return;
        }
        self.session.start();
        self.publish_status();
        self.shared.log.emit(EngineEvent::Started);
    }

    fn stop(&mut self, reason: StopReason) {
        self.session.stop();
        self.publish_status();
        self.shared.log.emit(EngineEvent::Stopped { reason });
    }

    fn publish_status(&self) {
        let _ = self.status_tx.send(self.session.status());
    }

    /// One full pass over the active template's chunks.
    async fn run_round(&mut self) -> Flow {
        let room_id = match self.ensure_room().await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "room resolution failed");
                self.stop(StopReason::RoomUnavailable);
                return Flow::Continue;
            }
        };

        let template = self.shared.templates.borrow().active_text().to_string();
        if template.trim().is_empty() {
            // The template emptied since start: auto-stop, distinct reason.
            self.stop(StopReason::TemplateEmpty);
            return Flow::Continue;
        }

        // Snapshot settings for the whole round.
        let settings = self.shared.settings.borrow().clone();
        let chunks = text::process(&template, settings.max_length, settings.random_char);

        let mut sent = 0usize;
        for chunk in &chunks {
            if let Flow::Shutdown = self.drain_commands().await {
                return Flow::Shutdown;
            }
            if !self.session.status().is_running() {
                // Stop honored at the chunk boundary; remaining chunks are
                // abandoned without outcomes.
                return Flow::Continue;
            }

            match self.dispatch_chunk(room_id, chunk, &settings).await {
                Ok(()) => sent += 1,
                Err(reason) => {
                    self.stop(reason);
                    return Flow::Continue;
                }
            }

            tokio::time::sleep(self.chunk_delay(&settings)).await;
        }

        // A template that filtered down to zero chunks still completes as a
        // no-op round.
        let round = self.session.complete_round();
        self.shared
            .log
            .emit(EngineEvent::RoundCompleted { round, sent });
        Flow::Continue
    }

    async fn drain_commands(&mut self) -> Flow {
        while let Ok(cmd) = self.commands.try_recv() {
            if let Flow::Shutdown = self.handle_command(cmd).await {
                return Flow::Shutdown;
            }
        }
        Flow::Continue
    }

    /// Substitute, optionally recolor, sign-and-send, report, maybe retry.
    /// `Err` carries a reason the whole session must stop for.
    async fn dispatch_chunk(
        &mut self,
        room_id: u64,
        chunk: &str,
        settings: &Settings,
    ) -> Result<(), StopReason> {
        let table = self.shared.rules.current();
        let outgoing = table.apply(chunk);

        if settings.random_color {
            self.spawn_color_change(room_id);
        }

        let result = match self.platform.send_message(room_id, &outgoing).await {
            Ok(SendReply::Accepted) => SendResult::Accepted,
            Ok(SendReply::Rejected(code)) => SendResult::Rejected(code),
            Err(SendError::MissingCredential) => {
                self.shared.log.emit(EngineEvent::Sent(SendOutcome {
                    attempt: Attempt::Auto,
                    original: chunk.to_string(),
                    sent: outgoing,
                    result: SendResult::Failed(SendError::MissingCredential.to_string()),
                }));
                return Err(StopReason::AuthRequired);
            }
            Err(e) => SendResult::Failed(e.to_string()),
        };

        let rejected = matches!(result, SendResult::Rejected(_));
        self.shared.log.emit(EngineEvent::Sent(SendOutcome {
            attempt: Attempt::Auto,
            original: chunk.to_string(),
            sent: outgoing.clone(),
            result,
        }));

        // The retry's outcome supersedes the original in the log; the round
        // continues regardless of how it went.
        if rejected && settings.ai_evasion {
            if let Some(retrier) = &self.retrier {
                match retrier.retry(self.platform.as_ref(), room_id, &outgoing).await {
                    RetryDecision::Unresolved => self
                        .shared
                        .log
                        .emit(EngineEvent::EvasionUnresolved { text: outgoing }),
                    RetryDecision::Retried(outcome) => {
                        self.shared.log.emit(EngineEvent::Sent(outcome));
                    }
                }
            }
        }

        Ok(())
    }

    /// One-off send outside the round structure. Never changes session
    /// state.
    async fn manual_send(&mut self, raw: String) {
        let message = raw.trim().to_string();
        if message.is_empty() {
            self.shared.log.emit(EngineEvent::ValidationFailed {
                reason: ValidationError::EmptyMessage.to_string(),
            });
            return;
        }

        let room_id = match self.ensure_room().await {
            Ok(id) => id,
            Err(e) => {
                self.shared.log.emit(EngineEvent::Sent(SendOutcome {
                    attempt: Attempt::Manual,
                    original: message.clone(),
                    sent: message,
                    result: SendResult::Failed(e.to_string()),
                }));
                return;
            }
        };

        let outgoing = self.shared.rules.current().apply(&message);
        let result = match self.platform.send_message(room_id, &outgoing).await {
            Ok(SendReply::Accepted) => SendResult::Accepted,
            Ok(SendReply::Rejected(code)) => SendResult::Rejected(code),
            Err(e) => SendResult::Failed(e.to_string()),
        };
        self.shared.log.emit(EngineEvent::Sent(SendOutcome {
            attempt: Attempt::Manual,
            original: message,
            sent: outgoing,
            result,
        }));
    }

    /// Resolve the room identity once per session and unlock the room rule
    /// tier.
    async fn ensure_room(&self) -> Result<u64, SendError> {
        if let Some(id) = self.shared.room_id.get() {
            return Ok(*id);
        }
        let id = self.platform.resolve_room(&self.room).await?;
        if self.shared.room_id.set(id).is_ok() {
            self.shared.rules.set_room(id);
            tracing::info!(room_id = id, "room resolved");
        }
        Ok(id)
    }

    /// Fire-and-forget display color change; failure is swallowed and never
    /// blocks the send.
    fn spawn_color_change(&self, room_id: u64) {
        let color = COLOR_PALETTE
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(COLOR_PALETTE[0]);
        let platform = Arc::clone(&self.platform);
        tokio::spawn(async move {
            if let Err(e) = platform.set_color(room_id, color).await {
                tracing::debug!(error = %e, "color change failed, ignored");
            }
        });
    }

    /// `interval − jitter`, clamped at zero.
    fn chunk_delay(&self, settings: &Settings) -> Duration {
        let jitter = if settings.random_interval {
            let cap = self.jitter_cap.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=cap))
        } else {
            Duration::ZERO
        };
        settings.send_interval().saturating_sub(jitter)
    }
}
