//! The dispatch engine: session state, command handling, settings actions.
//!
//! One [`Engine`] per page session. The dispatch loop runs as a single
//! background task and is the only writer of session status and the round
//! counter; settings actions replace shared values wholesale (watch swaps)
//! so the loop reads them without locking.

pub mod dispatch;
pub mod evasion;
pub mod outcome;
pub mod session;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, OnceCell};
use tokio::task::JoinHandle;

use crate::client::classifier::Classifier;
use crate::client::Platform;
use crate::config::{EngineConfig, Settings};
use crate::engine::dispatch::DispatchLoop;
use crate::engine::evasion::EvasionRetrier;
use crate::engine::outcome::{EngineEvent, EventLog};
use crate::engine::session::Status;
use crate::error::{Error, ValidationError};
use crate::rules::{RemoteKeywordDoc, RuleBook, RuleSync, SubstitutionRule};
use crate::store::{self, keys, ConfigStore};
use crate::text::TemplateSet;

/// Discrete commands delivered to the dispatch loop.
#[derive(Debug, Clone)]
pub(crate) enum Command {
    Start,
    Stop,
    SendOnce(String),
    Shutdown,
}

/// State shared between the engine handle, the dispatch loop and the sync
/// task. Mutations are whole-value swaps; readers never lock.
pub(crate) struct Shared {
    pub(crate) settings: watch::Sender<Settings>,
    pub(crate) templates: watch::Sender<TemplateSet>,
    pub(crate) rules: Arc<RuleBook>,
    pub(crate) log: Arc<EventLog>,
    pub(crate) room_id: OnceCell<u64>,
}

/// External collaborators injected into the engine.
pub struct EngineDeps {
    pub store: Arc<dyn ConfigStore>,
    pub platform: Arc<dyn Platform>,
    /// Enables the evasion retrier when present.
    pub classifier: Option<Arc<dyn Classifier>>,
}

/// Handle to a running engine. Cloneless by design: the embedding
/// application owns it and drives it through these methods.
pub struct Engine {
    shared: Arc<Shared>,
    store: Arc<dyn ConfigStore>,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<Status>,
    sync: Option<Arc<RuleSync>>,
    task: JoinHandle<()>,
}

impl Engine {
    /// Load persisted state, spawn the dispatch loop and (if configured) the
    /// rule sync task.
    pub async fn spawn(config: EngineConfig, deps: EngineDeps) -> Result<Self, Error> {
        let EngineDeps {
            store,
            platform,
            classifier,
        } = deps;

        let templates: Vec<String> = store::get_typed(store.as_ref(), keys::TEMPLATES)
            .await?
            .unwrap_or_default();
        let active: usize = store::get_typed(store.as_ref(), keys::ACTIVE_TEMPLATE_INDEX)
            .await?
            .unwrap_or(0);
        let local: Vec<SubstitutionRule> =
            store::get_typed(store.as_ref(), keys::REPLACEMENT_RULES)
                .await?
                .unwrap_or_default();
        let remote: Option<RemoteKeywordDoc> =
            store::get_typed(store.as_ref(), keys::REMOTE_KEYWORDS).await?;
        let settings: Settings = store::get_typed(store.as_ref(), keys::SETTINGS)
            .await?
            .unwrap_or_default();

        let rules = Arc::new(RuleBook::new());
        rules.set_local(local);
        if let Some(doc) = remote {
            rules.set_remote(doc);
        }

        let log = Arc::new(EventLog::new(settings.max_log_lines));
        let (settings_tx, _) = watch::channel(settings);
        let (templates_tx, _) = watch::channel(TemplateSet::new(templates, active));
        let shared = Arc::new(Shared {
            settings: settings_tx,
            templates: templates_tx,
            rules: Arc::clone(&rules),
            log: Arc::clone(&log),
            room_id: OnceCell::new(),
        });

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Status::Idle);

        let retrier = classifier.map(EvasionRetrier::new);
        let task = tokio::spawn(
            DispatchLoop::new(
                Arc::clone(&shared),
                platform,
                retrier,
                cmd_rx,
                status_tx,
                config.room.clone(),
                config.jitter_cap,
            )
            .run(),
        );

        let sync = config.rules_url.as_ref().map(|url| {
            Arc::new(RuleSync::new(
                reqwest::Client::new(),
                url.clone(),
                config.sync_interval,
                Arc::clone(&store),
                Arc::clone(&rules),
                Arc::clone(&log),
            ))
        });
        if let Some(sync) = &sync {
            tokio::spawn(Arc::clone(sync).run());
        }

        Ok(Self {
            shared,
            store,
            commands: cmd_tx,
            status: status_rx,
            sync,
            task,
        })
    }

    // ── Session control ─────────────────────────────────────────────

    pub fn start(&self) {
        let _ = self.commands.send(Command::Start);
    }

    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// One-off send outside the round structure.
    pub fn send_once(&self, text: impl Into<String>) {
        let _ = self.commands.send(Command::SendOnce(text.into()));
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Wait for the dispatch task to exit after `shutdown`.
    pub async fn join(self) {
        let _ = self.task.await;
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    // ── Observation ─────────────────────────────────────────────────

    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.log.subscribe()
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.shared.log.lines()
    }

    // ── Settings actions (atomic swaps + persistence) ───────────────

    pub fn settings(&self) -> Settings {
        self.shared.settings.borrow().clone()
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<(), Error> {
        store::set_typed(self.store.as_ref(), keys::SETTINGS, &settings).await?;
        self.shared.log.set_max_lines(settings.max_log_lines);
        self.shared.settings.send_replace(settings);
        Ok(())
    }

    pub fn templates(&self) -> TemplateSet {
        self.shared.templates.borrow().clone()
    }

    pub async fn select_template(&self, index: usize) -> Result<(), Error> {
        let mut set = self.templates();
        set.select(index)?;
        self.swap_templates(set).await
    }

    /// Replace the active template's text.
    pub async fn edit_active_template(&self, text: impl Into<String>) -> Result<(), Error> {
        let mut set = self.templates();
        set.set_active_text(text);
        self.swap_templates(set).await
    }

    pub async fn add_template(&self) -> Result<(), Error> {
        let mut set = self.templates();
        set.add();
        self.swap_templates(set).await
    }

    pub async fn remove_active_template(&self) -> Result<(), Error> {
        let mut set = self.templates();
        set.remove_active();
        self.swap_templates(set).await
    }

    async fn swap_templates(&self, set: TemplateSet) -> Result<(), Error> {
        store::set_typed(self.store.as_ref(), keys::TEMPLATES, &set.all().to_vec()).await?;
        store::set_typed(
            self.store.as_ref(),
            keys::ACTIVE_TEMPLATE_INDEX,
            &set.active_index(),
        )
        .await?;
        self.shared.templates.send_replace(set);
        Ok(())
    }

    // ── Local rule actions ──────────────────────────────────────────

    pub fn local_rules(&self) -> Vec<SubstitutionRule> {
        self.shared.rules.local_rules()
    }

    pub async fn add_rule(
        &self,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Result<(), Error> {
        let from = from.into();
        if from.is_empty() {
            return Err(ValidationError::EmptyRuleKey.into());
        }
        self.shared
            .rules
            .add_local(SubstitutionRule::new(from, to.into()));
        self.persist_local_rules().await
    }

    pub async fn remove_rule(&self, index: usize) -> Result<Option<SubstitutionRule>, Error> {
        let removed = self.shared.rules.remove_local(index);
        if removed.is_some() {
            self.persist_local_rules().await?;
        }
        Ok(removed)
    }

    async fn persist_local_rules(&self) -> Result<(), Error> {
        store::set_typed(
            self.store.as_ref(),
            keys::REPLACEMENT_RULES,
            &self.shared.rules.local_rules(),
        )
        .await?;
        Ok(())
    }

    /// Trigger an immediate remote rule sync, if a rules URL is configured.
    pub fn sync_now(&self) {
        if let Some(sync) = &self.sync {
            let sync = Arc::clone(sync);
            tokio::spawn(async move { sync.sync_and_report().await });
        }
    }
}
