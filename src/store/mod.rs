//! Opaque key-value persistence behind a narrow [`ConfigStore`] interface.
//!
//! The engine never touches storage mechanics directly; the surrounding
//! application injects a backend. Values are JSON documents keyed by the
//! fixed schema in [`keys`].

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;

/// Persisted key names. Kept verbatim from the original schema so existing
/// exports remain readable.
pub mod keys {
    pub const TEMPLATES: &str = "templates";
    pub const ACTIVE_TEMPLATE_INDEX: &str = "activeTemplateIndex";
    pub const REPLACEMENT_RULES: &str = "replacementRules";
    pub const REMOTE_KEYWORDS: &str = "remoteKeywords";
    pub const REMOTE_KEYWORDS_LAST_SYNC: &str = "remoteKeywordsLastSync";
    pub const SETTINGS: &str = "settings";
}

/// Backend-agnostic key-value store.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch the raw JSON value for `key`, if present.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write the raw JSON value for `key`.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove `key` if present.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Typed read helper over any [`ConfigStore`].
pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn ConfigStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Typed write helper over any [`ConfigStore`].
pub async fn set_typed<T: Serialize>(
    store: &dyn ConfigStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    store.set(key, serde_json::to_value(value)?).await
}
