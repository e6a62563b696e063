//! PII tokenization boundary
//!
//! Detects sensitive substrings against a fixed battery of categorized
//! patterns, replaces them with opaque tokens before payloads leave the
//! process, and restores them when results come back. One
//! [`ScopedTokenizer`] is created per run and owns that run's token map.

pub mod patterns;
pub mod scope;
pub mod tokenizer;

pub use patterns::PiiCategory;
pub use scope::ScopedTokenizer;
pub use tokenizer::{contains_pii, PiiTokenizer, TokenMap, TokenizeReport};
