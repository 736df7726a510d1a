//! Periodic remote rule synchronization.
//!
//! Fetches the remote keyword document, persists it verbatim, and swaps the
//! rebuilt table into the rule book. Runs concurrently with the dispatch
//! loop; the watch-swap discipline keeps readers consistent.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::engine::outcome::{EngineEvent, EventLog};
use crate::error::SyncError;
use crate::rules::{RemoteKeywordDoc, RuleBook};
use crate::store::{self, keys, ConfigStore};

pub struct RuleSync {
    http: reqwest::Client,
    url: String,
    interval: Duration,
    store: Arc<dyn ConfigStore>,
    rules: Arc<RuleBook>,
    log: Arc<EventLog>,
}

impl RuleSync {
    pub fn new(
        http: reqwest::Client,
        url: String,
        interval: Duration,
        store: Arc<dyn ConfigStore>,
        rules: Arc<RuleBook>,
        log: Arc<EventLog>,
    ) -> Self {
        Self {
            http,
            url,
            interval,
            store,
            rules,
            log,
        }
    }

    /// Sync immediately when the persisted copy is stale, then on every
    /// interval tick.
    pub async fn run(self: Arc<Self>) {
        let last: Option<i64> =
            store::get_typed(self.store.as_ref(), keys::REMOTE_KEYWORDS_LAST_SYNC)
                .await
                .unwrap_or_default();
        if is_stale(last, Utc::now().timestamp_millis(), self.interval) {
            self.sync_and_report().await;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // skip the immediate first tick
        loop {
            ticker.tick().await;
            self.sync_and_report().await;
        }
    }

    /// One sync pass, reported through the event stream.
    pub async fn sync_and_report(&self) {
        match self.sync_once().await {
            Ok(rules) => self.log.emit(EngineEvent::RulesSynced { rules }),
            Err(e) => {
                tracing::warn!(error = %e, "remote rule sync failed");
                self.log.emit(EngineEvent::RuleSyncFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    async fn sync_once(&self) -> Result<usize, SyncError> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SyncError::Status(resp.status().as_u16()));
        }
        let doc: RemoteKeywordDoc = resp
            .json()
            .await
            .map_err(|e| SyncError::Decode(e.to_string()))?;

        // Persistence failures degrade to in-memory-only rules; the fetched
        // document still takes effect.
        if let Err(e) = store::set_typed(self.store.as_ref(), keys::REMOTE_KEYWORDS, &doc).await {
            tracing::warn!(error = %e, "failed to persist remote rules");
        }
        if let Err(e) = store::set_typed(
            self.store.as_ref(),
            keys::REMOTE_KEYWORDS_LAST_SYNC,
            &Utc::now().timestamp_millis(),
        )
        .await
        {
            tracing::warn!(error = %e, "failed to persist sync timestamp");
        }

        let count = doc.applicable_count(self.rules.room_id());
        self.rules.set_remote(doc);
        Ok(count)
    }
}

/// Whether a new sync is due given the last sync time in Unix millis.
fn is_stale(last_sync_millis: Option<i64>, now_millis: i64, interval: Duration) -> bool {
    match last_sync_millis {
        Some(last) => now_millis.saturating_sub(last) >= interval.as_millis() as i64,
        None => true,
    }
}
