//! Request signing for the platform's anti-abuse gateway.
//!
//! The signature salts an MD5 digest with a session-scoped mixin key derived
//! by permuting two harvested key fragments. The asymmetry is deliberate and
//! load-bearing: the digest is computed over the *sorted* parameter set, but
//! the request transmits parameters in their *original* order. Both sides
//! strip `!'()*` from values and percent-encode on UTF-8 bytes.

pub mod provider;

use std::sync::Arc;

use md5::{Digest, Md5};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tokio::sync::OnceCell;

pub use provider::{HttpKeyProvider, KeyProvider};

/// Fixed permutation over the concatenated key fragments. One character is
/// taken per index, truncated to 32.
const MIXIN_KEY_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22,
    25, 54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// Characters stripped from parameter values before encoding.
const STRIPPED: [char; 5] = ['!', '\'', '(', ')', '*'];

/// `encodeURIComponent` equivalence: everything but ASCII alphanumerics and
/// `-_.!~*'()` is percent-encoded, uppercase hex, over UTF-8 bytes.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Session-scoped signing key material. Read-only once harvested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WbiKeys {
    pub img_key: String,
    pub sub_key: String,
}

impl WbiKeys {
    pub fn new(img_key: impl Into<String>, sub_key: impl Into<String>) -> Self {
        Self {
            img_key: img_key.into(),
            sub_key: sub_key.into(),
        }
    }

    /// Derive the 32-character mixin key: permute `img_key + sub_key` by the
    /// fixed table, truncate to 32. Indexes past the end of short key
    /// material are skipped.
    pub fn mixin_key(&self) -> String {
        let raw: Vec<char> = self
            .img_key
            .chars()
            .chain(self.sub_key.chars())
            .collect();
        MIXIN_KEY_TAB
            .iter()
            .filter_map(|&i| raw.get(i))
            .take(32)
            .collect()
    }
}

/// A signed form body ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedForm {
    /// Form-encoded body: original parameter order, then `w_rid` and `wts`.
    pub body: String,
    /// MD5 hex signature.
    pub w_rid: String,
    /// Unix timestamp (seconds) the signature covers.
    pub wts: i64,
}

fn sanitize_value(value: &str) -> String {
    value.chars().filter(|c| !STRIPPED.contains(c)).collect()
}

fn encode_component(s: &str) -> String {
    utf8_percent_encode(s, COMPONENT).to_string()
}

/// Encode parameters as `key=value&...` with sanitized, component-encoded
/// values, preserving the given order. Also the unsigned fallback body.
pub fn encode_pairs(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(&sanitize_value(v))))
        .collect::<Vec<_>>()
        .join("&")
}

/// Sign `params` for timestamp `wts` with a derived mixin key.
///
/// The digest covers the lexicographically key-sorted parameter set
/// (including `wts`); the returned body preserves the caller's order and
/// appends `w_rid` and `wts`.
pub fn sign(params: &[(&str, String)], wts: i64, mixin_key: &str) -> SignedForm {
    let mut sorted: Vec<(&str, String)> = params.to_vec();
    sorted.push(("wts", wts.to_string()));
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let sorted_query = encode_pairs(&sorted);
    let digest = Md5::digest(format!("{sorted_query}{mixin_key}").as_bytes());
    let w_rid = hex::encode(digest);

    let body = format!("{}&w_rid={}&wts={}", encode_pairs(params), w_rid, wts);
    SignedForm { body, w_rid, wts }
}

/// Write-once holder for harvested key material.
///
/// Populated at most once per session by a background harvest task; the
/// dispatch loop reads it lock-free before every send and proceeds unsigned
/// while it is still empty.
#[derive(Default)]
pub struct KeySlot {
    cell: OnceCell<WbiKeys>,
}

impl KeySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current key material, if harvested.
    pub fn get(&self) -> Option<&WbiKeys> {
        self.cell.get()
    }

    /// Populate the slot. Returns `false` if it was already set.
    pub fn set(&self, keys: WbiKeys) -> bool {
        self.cell.set(keys).is_ok()
    }

    /// Resolve the slot exactly once from `provider`, retrying with capped
    /// backoff until it succeeds. The loop may run indefinitely; sends stay
    /// unsigned meanwhile.
    pub fn spawn_harvest(self: &Arc<Self>, provider: Arc<dyn KeyProvider>) {
        let slot = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff = std::time::Duration::from_secs(5);
            loop {
                match provider.fetch().await {
                    Ok(keys) => {
                        tracing::info!("signing key material harvested");
                        slot.set(keys);
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "key harvest failed, retrying in {:?}", backoff);
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(std::time::Duration::from_secs(300));
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Published reference pair for the mixin-key derivation.
    const IMG_KEY: &str = "653657f524a547ac981ded72ea172057";
    const SUB_KEY: &str = "6e4909c702f846728e64f6007736a338";

    #[test]
    fn mixin_key_matches_reference_vector() {
        let keys = WbiKeys::new(IMG_KEY, SUB_KEY);
        assert_eq!(keys.mixin_key(), "72136226c6a73669787ee4fd02a74c27");
    }

    #[test]
    fn mixin_key_is_32_chars() {
        assert_eq!(WbiKeys::new(IMG_KEY, SUB_KEY).mixin_key().len(), 32);
    }

    #[test]
    fn mixin_key_tolerates_short_material() {
        // Indexes past the end are skipped rather than panicking.
        let keys = WbiKeys::new("short", "keys");
        assert!(keys.mixin_key().len() <= 32);
    }

    #[test]
    fn signature_matches_reference_vector() {
        // Independently computed: md5("bar=514&foo=114&wts=1702204169&zab=1919810" + mixin).
        let mixin = WbiKeys::new(IMG_KEY, SUB_KEY).mixin_key();
        let params = [
            ("foo", "114".to_string()),
            ("bar", "514".to_string()),
            ("zab", "1919810".to_string()),
        ];
        let signed = sign(&params, 1702204169, &mixin);
        assert_eq!(signed.w_rid, "cd2f6fa31d888583a63f744d3dca05b0");
        assert_eq!(
            signed.body,
            "foo=114&bar=514&zab=1919810&w_rid=cd2f6fa31d888583a63f744d3dca05b0&wts=1702204169"
        );
    }

    #[test]
    fn signature_hashes_utf8_bytes_and_strips_values() {
        // Multi-byte value plus every stripped character; reference digest
        // computed over the UTF-8 encoded sorted query string.
        let mixin = WbiKeys::new(IMG_KEY, SUB_KEY).mixin_key();
        let params = [
            ("msg", "你好(world)!*'".to_string()),
            ("roomid", "21013446".to_string()),
            ("color", "16777215".to_string()),
        ];
        let signed = sign(&params, 1700000000, &mixin);
        assert_eq!(signed.w_rid, "9890a0cb7477f36312fd53386ab482b7");
        // Transmitted order is the caller's, not sorted; values arrive stripped.
        assert!(signed.body.starts_with("msg=%E4%BD%A0%E5%A5%BDworld&roomid=21013446&color=16777215&w_rid="));
    }

    #[test]
    fn signing_is_deterministic() {
        let mixin = WbiKeys::new(IMG_KEY, SUB_KEY).mixin_key();
        let params = [("a", "1".to_string()), ("b", "2".to_string())];
        let first = sign(&params, 1234567890, &mixin);
        let second = sign(&params, 1234567890, &mixin);
        assert_eq!(first, second);
    }

    #[test]
    fn encode_pairs_preserves_order_and_encodes_components() {
        let params = [
            ("b", "two words".to_string()),
            ("a", "{\"appId\":100,\"platform\":5}".to_string()),
        ];
        let encoded = encode_pairs(&params);
        assert!(encoded.starts_with("b=two%20words&a=%7B%22appId%22%3A100"));
    }

    #[test]
    fn key_slot_sets_once() {
        let slot = KeySlot::new();
        assert!(slot.get().is_none());
        assert!(slot.set(WbiKeys::new("a", "b")));
        assert!(!slot.set(WbiKeys::new("c", "d")));
        assert_eq!(slot.get().unwrap().img_key, "a");
    }
}
