//! Configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// User-tunable settings, persisted under the `settings` store key.
///
/// Field names serialize camelCase so the stored document matches the
/// original key-value schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Delay between messages, in seconds.
    pub msg_send_interval: u64,
    /// Maximum message length in grapheme clusters; longer lines are split.
    pub max_length: usize,
    /// Maximum lines retained in the in-memory event log.
    pub max_log_lines: usize,
    /// Pick a random display color before each send.
    pub random_color: bool,
    /// Subtract a random jitter from the inter-message delay.
    pub random_interval: bool,
    /// Insert one zero-width character per line at a random position.
    pub random_char: bool,
    /// Consult the content classifier and retry once after a rejection.
    pub ai_evasion: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            msg_send_interval: 1,
            max_length: 20,
            max_log_lines: 1000,
            random_color: false,
            random_interval: false,
            random_char: false,
            ai_evasion: false,
        }
    }
}

impl Settings {
    /// Delay between messages as a [`Duration`].
    pub fn send_interval(&self) -> Duration {
        Duration::from_secs(self.msg_send_interval)
    }
}

/// Static engine configuration, resolved at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Room identifier: either the numeric short id or a full room URL.
    pub room: String,
    /// Remote rule document URL. `None` disables the sync task.
    pub rules_url: Option<String>,
    /// Cadence of the remote rule sync task.
    pub sync_interval: Duration,
    /// Upper bound on the random jitter subtracted from the send delay.
    pub jitter_cap: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            room: String::new(),
            rules_url: None,
            sync_interval: Duration::from_secs(15 * 60),
            jitter_cap: Duration::from_millis(500),
        }
    }
}
