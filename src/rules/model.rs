//! Rule types and the remote keyword document schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One literal substitution rule. `from` is matched as a plain substring,
/// never as a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionRule {
    pub from: String,
    pub to: String,
}

impl SubstitutionRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Remote rule document, fetched periodically and persisted verbatim under
/// the `remoteKeywords` store key.
///
/// Keyword maps deserialize into `BTreeMap` so within-tier iteration is
/// key-sorted and deterministic; the merged table's outcome does not depend
/// on within-tier order (later entries only overwrite), but chained
/// application order must be reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteKeywordDoc {
    #[serde(default)]
    pub global: TierKeywords,
    #[serde(default)]
    pub rooms: Vec<RoomKeywords>,
}

/// A keyword tier: `from → to` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierKeywords {
    #[serde(default)]
    pub keywords: BTreeMap<String, String>,
}

/// Keywords scoped to one numeric room identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomKeywords {
    pub room: u64,
    #[serde(default)]
    pub keywords: BTreeMap<String, String>,
}

impl RemoteKeywordDoc {
    /// Keywords for a specific room, if the document carries any.
    pub fn room_keywords(&self, room_id: u64) -> Option<&BTreeMap<String, String>> {
        self.rooms
            .iter()
            .find(|r| r.room == room_id)
            .map(|r| &r.keywords)
    }

    /// Total rule count applicable to `room_id` (global + that room's tier).
    pub fn applicable_count(&self, room_id: Option<u64>) -> usize {
        let room = room_id
            .and_then(|id| self.room_keywords(id))
            .map(BTreeMap::len)
            .unwrap_or(0);
        self.global.keywords.len() + room
    }
}
