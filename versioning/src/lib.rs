//! Version registry
//!
//! Tracks the lifecycle of agents and tools through
//! `active → deprecated → sunset` and gates every execution through
//! [`VersionRegistry::check_before_use`]. Compatibility checks parse
//! semver and enforce major-version equality plus an optional
//! minimum-compatible floor.

pub mod compatibility;
pub mod registry;
pub mod storage;
pub mod types;

pub use compatibility::{check_compatibility, CompatibilityReport};
pub use registry::VersionRegistry;
pub use storage::{MemoryVersionStore, SqliteVersionStore, VersionStore};
pub use types::*;
