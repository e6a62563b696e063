//! Run-scoped tokenizer
//!
//! One scope exists per run. It accumulates every tokenize call into a
//! single map so results coming back from any external hop can be restored,
//! and is dropped with the run, clearing the map.

use crate::patterns::PiiCategory;
use crate::tokenizer::{detokenize, PiiTokenizer, TokenMap};
use std::sync::Mutex;
use tracing::debug;

/// Accumulating tokenizer owned by exactly one run.
#[derive(Debug)]
pub struct ScopedTokenizer {
    inner: PiiTokenizer,
    map: Mutex<TokenMap>,
    detected: Mutex<Vec<PiiCategory>>,
}

impl ScopedTokenizer {
    pub fn new() -> Self {
        Self {
            inner: PiiTokenizer::new(),
            map: Mutex::new(TokenMap::new()),
            detected: Mutex::new(Vec::new()),
        }
    }

    /// Tokenize a string, folding new tokens into the scope map.
    pub fn tokenize(&self, data: &str) -> String {
        let report = self.inner.tokenize(data);
        if report.token_count > 0 {
            let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
            map.extend(report.token_map);
            let mut detected = self.detected.lock().unwrap_or_else(|e| e.into_inner());
            for category in report.detected_types {
                if !detected.contains(&category) {
                    detected.push(category);
                }
            }
        }
        report.tokenized
    }

    /// Tokenize every string leaf of a JSON document in place, keeping the
    /// document well-formed. Object keys are left untouched.
    pub fn tokenize_json(&self, value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::String(s) => serde_json::Value::String(self.tokenize(s)),
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| self.tokenize_json(v)).collect())
            }
            serde_json::Value::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.tokenize_json(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Restore every known token in a string.
    pub fn detokenize(&self, text: &str) -> String {
        let map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        detokenize(text, &map)
    }

    /// Restore every known token across a JSON document.
    pub fn detokenize_json(&self, value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::String(s) => serde_json::Value::String(self.detokenize(s)),
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| self.detokenize_json(v)).collect())
            }
            serde_json::Value::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.detokenize_json(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Reverse lookup: the token minted for an original value, if any.
    pub fn token_for(&self, original: &str) -> Option<String> {
        let map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.iter()
            .find(|(_, v)| v.as_str() == original)
            .map(|(k, _)| k.clone())
    }

    /// Categories seen across all tokenize calls in this scope.
    pub fn detected_types(&self) -> Vec<PiiCategory> {
        self.detected.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of tokens held by the scope.
    pub fn token_count(&self) -> usize {
        self.map.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for ScopedTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopedTokenizer {
    fn drop(&mut self) {
        let count = self.token_count();
        if count > 0 {
            debug!("Dropping tokenizer scope with {} token(s)", count);
        }
    }
}
