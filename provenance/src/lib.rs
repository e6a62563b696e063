//! Provenance log
//!
//! Append-only audit of everything an execution did: LLM calls, tool
//! calls, errors. Records are content-addressed by 16-hex-character
//! SHA-256 prefixes; full payloads are only persisted when the
//! originating run carries an explicit debug flag. Writes are
//! best-effort: a failed append never fails the operation that
//! produced it.

pub mod service;
pub mod storage;
pub mod types;

pub use service::ProvenanceLog;
pub use storage::{MemoryProvenanceStore, ProvenanceStore, SqliteProvenanceStore};
pub use types::*;

use sha2::{Digest, Sha256};

/// 16-hex-character SHA-256 prefix used to address content without
/// storing it.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_16_hex_chars_and_stable() {
        let a = content_hash("hello");
        let b = content_hash("hello");
        let c = content_hash("world");
        assert_eq!(a.len(), 16);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
