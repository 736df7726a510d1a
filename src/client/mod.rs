//! Platform API client: room resolution, message send, color config.

pub mod classifier;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::SendError;
use crate::sign::{encode_pairs, sign, KeySlot};

/// Fixed message color transmitted in the send form (white). Display-color
/// randomization goes through the separate config endpoint instead.
pub const DEFAULT_COLOR: u32 = 16777215;

/// Constant `statistics` form field the platform expects.
const STATISTICS: &str = r#"{"appId":100,"platform":5}"#;

/// Outcome of a send request as the platform reported it. A rejection is a
/// well-formed response, not a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendReply {
    Accepted,
    Rejected(RejectCode),
}

/// Opaque rejection code carried in the response `message` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectCode {
    raw: String,
}

/// Known rejection classes, matched by substring on the opaque code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    GlobalBlocklist,
    RoomBlocklist,
    Other,
}

impl RejectCode {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> RejectKind {
        if self.raw.contains('f') {
            RejectKind::GlobalBlocklist
        } else if self.raw.contains('k') {
            RejectKind::RoomBlocklist
        } else {
            RejectKind::Other
        }
    }
}

impl std::fmt::Display for RejectCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            RejectKind::GlobalBlocklist => write!(f, "{} (global blocklist hit)", self.raw),
            RejectKind::RoomBlocklist => write!(f, "{} (room blocklist hit)", self.raw),
            RejectKind::Other => write!(f, "{}", self.raw),
        }
    }
}

/// The host platform's network surface, behind a trait so the dispatch loop
/// is testable without I/O.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Resolve a short room identifier (or room URL) to the canonical
    /// numeric room id.
    async fn resolve_room(&self, room: &str) -> Result<u64, SendError>;

    /// Send one message to `room_id`. Signed when key material is available.
    async fn send_message(&self, room_id: u64, text: &str) -> Result<SendReply, SendError>;

    /// Best-effort display color change. Callers swallow failures.
    async fn set_color(&self, room_id: u64, color: &str) -> Result<(), SendError>;
}

/// HTTP implementation against the live platform.
pub struct HttpPlatform {
    http: reqwest::Client,
    base: String,
    csrf: Option<SecretString>,
    keys: Arc<KeySlot>,
}

impl HttpPlatform {
    pub fn new(
        http: reqwest::Client,
        base: impl Into<String>,
        csrf: Option<SecretString>,
        keys: Arc<KeySlot>,
    ) -> Self {
        Self {
            http,
            base: base.into(),
            csrf,
            keys,
        }
    }

    /// The session credential, or the hard precondition failure every send
    /// path reports before touching the network.
    fn credential(&self) -> Result<String, SendError> {
        self.csrf
            .as_ref()
            .map(|s| s.expose_secret().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(SendError::MissingCredential)
    }
}

#[derive(Debug, Deserialize)]
struct RoomInitResponse {
    #[serde(default)]
    code: i64,
    data: Option<RoomInitData>,
}

#[derive(Debug, Deserialize)]
struct RoomInitData {
    room_id: u64,
}

#[derive(Debug, Deserialize)]
struct MsgSendResponse {
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl Platform for HttpPlatform {
    async fn resolve_room(&self, room: &str) -> Result<u64, SendError> {
        let short_id = extract_room_number(room)
            .ok_or_else(|| SendError::RoomResolution(format!("no room number in {room:?}")))?;

        let url = format!("{}/room/v1/Room/room_init?id={}", self.base, short_id);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;
        let init: RoomInitResponse = resp
            .json()
            .await
            .map_err(|e| SendError::InvalidResponse(e.to_string()))?;

        init.data
            .map(|d| d.room_id)
            .ok_or_else(|| SendError::RoomResolution(format!("room_init code {}", init.code)))
    }

    async fn send_message(&self, room_id: u64, text: &str) -> Result<SendReply, SendError> {
        let csrf = self.credential()?;
        let now = chrono::Utc::now().timestamp();

        let params: Vec<(&str, String)> = vec![
            ("bubble", "2".into()),
            ("msg", text.to_string()),
            ("color", DEFAULT_COLOR.to_string()),
            ("mode", "1".into()),
            ("room_type", "0".into()),
            ("jumpfrom", "0".into()),
            ("reply_mid", "0".into()),
            ("reply_attr", "0".into()),
            ("replay_dmid", String::new()),
            ("statistics", STATISTICS.into()),
            ("fontsize", "25".into()),
            ("rnd", now.to_string()),
            ("roomid", room_id.to_string()),
            ("csrf", csrf.clone()),
            ("csrf_token", csrf),
        ];

        let body = match self.keys.get() {
            Some(keys) => sign(&params, now, &keys.mixin_key()).body,
            None => {
                tracing::debug!("signing keys not yet harvested, sending unsigned");
                encode_pairs(&params)
            }
        };

        let resp = self
            .http
            .post(format!("{}/msg/send", self.base))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SendError::Transport(format!("HTTP {}", resp.status())));
        }

        let reply: MsgSendResponse = resp
            .json()
            .await
            .map_err(|e| SendError::InvalidResponse(e.to_string()))?;

        match reply.message {
            Some(code) if !code.is_empty() => Ok(SendReply::Rejected(RejectCode::new(code))),
            _ => Ok(SendReply::Accepted),
        }
    }

    async fn set_color(&self, room_id: u64, color: &str) -> Result<(), SendError> {
        let csrf = self.credential()?;
        let room = room_id.to_string();
        let resp = self
            .http
            .post(format!("{}/xlive/web-room/v1/dM/AjaxSetConfig", self.base))
            .form(&[
                ("room_id", room.as_str()),
                ("color", color),
                ("csrf_token", csrf.as_str()),
                ("csrf", csrf.as_str()),
                ("visit_id", ""),
            ])
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SendError::Transport(format!("HTTP {}", resp.status())));
        }
        Ok(())
    }
}

/// Pull the numeric room identifier out of a bare id or a room URL: the
/// first path segment consisting only of digits.
pub fn extract_room_number(input: &str) -> Option<String> {
    let re = Regex::new(r"(?:^|/)(\d+)(?:[/?#]|$)").unwrap();
    re.captures(input).map(|c| c[1].to_string())
}
