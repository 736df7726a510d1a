//! Key-material providers.
//!
//! The engine only needs "give me keys when ready"; how they are obtained is
//! a provider concern. The HTTP provider reads the host's navigation
//! endpoint, which exposes the two key fragments as image URL basenames.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::SendError;
use crate::sign::WbiKeys;

/// Asynchronous source of signing key material. Implementations should be
/// cheap to retry; the harvest task calls `fetch` until it succeeds.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn fetch(&self) -> Result<WbiKeys, SendError>;
}

#[derive(Debug, Deserialize)]
struct NavResponse {
    data: NavData,
}

#[derive(Debug, Deserialize)]
struct NavData {
    wbi_img: WbiImg,
}

#[derive(Debug, Deserialize)]
struct WbiImg {
    img_url: String,
    sub_url: String,
}

/// Fetches key material from the navigation endpoint.
pub struct HttpKeyProvider {
    http: reqwest::Client,
    nav_url: String,
}

impl HttpKeyProvider {
    pub fn new(http: reqwest::Client, nav_url: impl Into<String>) -> Self {
        Self {
            http,
            nav_url: nav_url.into(),
        }
    }
}

#[async_trait]
impl KeyProvider for HttpKeyProvider {
    async fn fetch(&self) -> Result<WbiKeys, SendError> {
        let resp = self
            .http
            .get(&self.nav_url)
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;
        let nav: NavResponse = resp
            .json()
            .await
            .map_err(|e| SendError::InvalidResponse(e.to_string()))?;

        let img_key = key_from_url(&nav.data.wbi_img.img_url)
            .ok_or_else(|| SendError::InvalidResponse("img_url has no key stem".into()))?;
        let sub_key = key_from_url(&nav.data.wbi_img.sub_url)
            .ok_or_else(|| SendError::InvalidResponse("sub_url has no key stem".into()))?;
        Ok(WbiKeys::new(img_key, sub_key))
    }
}

/// Extract the key fragment from an image URL: the file basename without its
/// extension.
fn key_from_url(url: &str) -> Option<String> {
    let basename = url.rsplit('/').next()?;
    let stem = basename.split('.').next()?;
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}
