//! External content classifier client.
//!
//! The evasion retrier asks the classifier which tokens triggered a
//! rejection. Classifier failures are downgraded by callers to "no flags
//! found" so the original rejection stands.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;

/// Classifier verdict: the flagged tokens, empty when the text is clean.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifierVerdict {
    pub flagged: Vec<String>,
}

impl ClassifierVerdict {
    pub fn is_clean(&self) -> bool {
        self.flagged.is_empty()
    }
}

/// Sensitive-content classifier seam.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn inspect(&self, text: &str) -> Result<ClassifierVerdict, ClassifierError>;
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    #[serde(rename = "completionMetadata")]
    completion_metadata: CompletionMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct CompletionMetadata<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    completion: Completion,
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(rename = "hasSensitiveContent", default)]
    has_sensitive_content: bool,
    #[serde(rename = "sensitiveWords", default)]
    sensitive_words: Vec<String>,
}

/// HTTP classifier implementation.
pub struct HttpClassifier {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpClassifier {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn inspect(&self, text: &str) -> Result<ClassifierVerdict, ClassifierError> {
        let request = ClassifyRequest {
            completion_metadata: CompletionMetadata { input: text },
        };
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ClassifierError::Transport(format!("HTTP {}", resp.status())));
        }

        let parsed: ClassifyResponse = resp
            .json()
            .await
            .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;

        let flagged = if parsed.completion.has_sensitive_content {
            parsed.completion.sensitive_words
        } else {
            Vec::new()
        };
        Ok(ClassifierVerdict { flagged })
    }
}
