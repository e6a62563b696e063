//! Tokenize / detokenize engine

use crate::patterns::{PiiCategory, PATTERNS};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Mapping from minted token to the original substring.
pub type TokenMap = HashMap<String, String>;

/// Result of one tokenize pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizeReport {
    pub tokenized: String,
    pub token_map: TokenMap,
    pub detected_types: Vec<PiiCategory>,
    pub token_count: usize,
}

/// Deterministic PII replacer.
///
/// Tokens are `__<CATEGORY>_<session><counter>__` where the session prefix
/// is random per tokenizer and the counter increases monotonically, so two
/// runs never mint colliding tokens and repeated occurrences of the same
/// value within a run still restore correctly.
#[derive(Debug)]
pub struct PiiTokenizer {
    session: String,
    counter: AtomicU64,
}

impl PiiTokenizer {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let session: String = (0..6)
            .map(|_| {
                let chars = b"abcdefghijklmnopqrstuvwxyz0123456789";
                chars[rng.gen_range(0..chars.len())] as char
            })
            .collect();
        Self {
            session,
            counter: AtomicU64::new(0),
        }
    }

    /// Replace every detected PII substring with a fresh token.
    ///
    /// Categories run in the fixed battery order; each category replaces
    /// all of its matches before the next category scans, so overlapping
    /// patterns (credit card vs bank account) resolve deterministically.
    pub fn tokenize(&self, data: &str) -> TokenizeReport {
        let mut tokenized = data.to_string();
        let mut token_map = TokenMap::new();
        let mut detected_types = Vec::new();

        for pattern in PATTERNS.iter() {
            let mut replaced_any = false;
            loop {
                let Some(m) = pattern.regex.find(&tokenized) else {
                    break;
                };
                let range = m.range();
                let original = m.as_str().to_string();
                let token = self.mint(pattern.category);
                tokenized.replace_range(range, &token);
                token_map.insert(token, original);
                replaced_any = true;
            }
            if replaced_any {
                detected_types.push(pattern.category);
            }
        }

        if !token_map.is_empty() {
            debug!(
                "Tokenized {} PII occurrence(s) across {} category(ies)",
                token_map.len(),
                detected_types.len()
            );
        }

        TokenizeReport {
            token_count: token_map.len(),
            tokenized,
            token_map,
            detected_types,
        }
    }

    /// Stringify non-string JSON before tokenizing.
    pub fn tokenize_value(&self, data: &serde_json::Value) -> TokenizeReport {
        match data {
            serde_json::Value::String(s) => self.tokenize(s),
            other => self.tokenize(&other.to_string()),
        }
    }

    fn mint(&self, category: PiiCategory) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("__{}_{}{}__", category.token_label(), self.session, n)
    }
}

impl Default for PiiTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Restore original values. Textual replace-all for each token; tokens not
/// present in the text are ignored.
pub fn detokenize(text: &str, token_map: &TokenMap) -> String {
    let mut restored = text.to_string();
    for (token, original) in token_map {
        restored = restored.replace(token, original);
    }
    restored
}

/// Non-mutating detection probe used by logging gates and as a policy
/// attribute.
pub fn contains_pii(data: &str) -> bool {
    PATTERNS.iter().any(|p| p.regex.is_match(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_restores_original() {
        let tokenizer = PiiTokenizer::new();
        let input = "email u@x.com, phone 555-123-4567, card 4111-1111-1111-1111";
        let report = tokenizer.tokenize(input);

        assert_eq!(report.token_count, 3);
        assert!(!report.tokenized.contains("u@x.com"));
        assert!(!report.tokenized.contains("555-123-4567"));
        assert!(!report.tokenized.contains("4111-1111-1111-1111"));

        let restored = detokenize(&report.tokenized, &report.token_map);
        assert_eq!(restored, input);
    }

    #[test]
    fn repeated_values_get_distinct_tokens() {
        let tokenizer = PiiTokenizer::new();
        let report = tokenizer.tokenize("a@b.co and again a@b.co");
        assert_eq!(report.token_count, 2);
        assert_eq!(detokenize(&report.tokenized, &report.token_map), "a@b.co and again a@b.co");
    }

    #[test]
    fn detected_types_follow_battery_order() {
        let tokenizer = PiiTokenizer::new();
        let report = tokenizer.tokenize("ssn 123-45-6789 for u@x.com");
        assert_eq!(
            report.detected_types,
            vec![PiiCategory::Email, PiiCategory::Ssn]
        );
    }

    #[test]
    fn clean_text_passes_through() {
        let tokenizer = PiiTokenizer::new();
        let report = tokenizer.tokenize("nothing sensitive here");
        assert_eq!(report.token_count, 0);
        assert_eq!(report.tokenized, "nothing sensitive here");
        assert!(!contains_pii("nothing sensitive here"));
    }

    #[test]
    fn contains_pii_probe() {
        assert!(contains_pii("mail me: person@example.com"));
        assert!(contains_pii("ip 192.168.1.10"));
        assert!(!contains_pii("plain words only"));
    }

    #[test]
    fn non_string_values_are_stringified() {
        let tokenizer = PiiTokenizer::new();
        let value = serde_json::json!({ "email": "u@x.com" });
        let report = tokenizer.tokenize_value(&value);
        assert_eq!(report.token_count, 1);
        assert!(!report.tokenized.contains("u@x.com"));
    }
}
