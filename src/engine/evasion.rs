//! Classifier-gated retry after a platform rejection.
//!
//! At most one retry per original send. The rewrite breaks literal blocklist
//! matching by lacing flagged tokens with zero-width joiners; everything
//! outside the flagged tokens is left untouched.

use std::sync::Arc;

use crate::client::classifier::Classifier;
use crate::client::{Platform, SendReply};
use crate::engine::outcome::{Attempt, SendOutcome, SendResult};
use crate::text::{graphemes, ZERO_WIDTH_JOINER};

/// What the retrier decided about one rejected send.
#[derive(Debug, Clone)]
pub enum RetryDecision {
    /// No retry issued: the classifier flagged nothing present in the text
    /// (or failed, which is treated the same). Manual review needed.
    Unresolved,
    /// Exactly one retry was issued; its own outcome is reported.
    Retried(SendOutcome),
}

pub struct EvasionRetrier {
    classifier: Arc<dyn Classifier>,
}

impl EvasionRetrier {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    /// Query the classifier for `rejected_text` and retry once with locally
    /// obfuscated text if any flagged token is present.
    pub async fn retry(
        &self,
        platform: &dyn Platform,
        room_id: u64,
        rejected_text: &str,
    ) -> RetryDecision {
        let verdict = match self.classifier.inspect(rejected_text).await {
            Ok(verdict) => verdict,
            Err(e) => {
                // Classifier failure downgrades to "no flags found".
                tracing::warn!(error = %e, "classifier unavailable, rejection stands");
                return RetryDecision::Unresolved;
            }
        };

        if verdict.is_clean() {
            return RetryDecision::Unresolved;
        }

        let rewritten = obfuscate(rejected_text, &verdict.flagged);
        if rewritten == rejected_text {
            // Flagged tokens not actually present as substrings.
            return RetryDecision::Unresolved;
        }

        let result = match platform.send_message(room_id, &rewritten).await {
            Ok(SendReply::Accepted) => SendResult::Accepted,
            Ok(SendReply::Rejected(code)) => SendResult::Rejected(code),
            Err(e) => SendResult::Failed(e.to_string()),
        };

        RetryDecision::Retried(SendOutcome {
            attempt: Attempt::Retry,
            original: rejected_text.to_string(),
            sent: rewritten,
            result,
        })
    }
}

/// Rewrite every occurrence of each flagged token by interleaving a
/// zero-width joiner between adjacent grapheme clusters within the token.
fn obfuscate(text: &str, flagged: &[String]) -> String {
    let mut result = text.to_string();
    for token in flagged {
        if token.is_empty() || !result.contains(token.as_str()) {
            continue;
        }
        result = result.replace(token.as_str(), &lace(token));
    }
    result
}

/// Interleave zero-width joiners between every pair of adjacent clusters.
fn lace(token: &str) -> String {
    graphemes(token).join(&ZERO_WIDTH_JOINER.to_string())
}
