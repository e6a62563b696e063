//! Policy engine (ABAC)
//!
//! Access decisions are computed from attributes of subject, resource,
//! action, and environment against a priority-ordered policy set. The
//! scan stops at the first matching policy; an explicit deny halts
//! immediately; no match means deny. Every evaluation is audited.

pub mod audit;
pub mod cache;
pub mod conditions;
pub mod engine;
pub mod restrictions;
pub mod roles;
pub mod store;
pub mod types;

pub use audit::{AuditSink, LogAuditSink, SqliteAuditSink};
pub use cache::PolicyCache;
pub use engine::PolicyEngine;
pub use roles::{Role, RoleAssignment, RoleTable};
pub use store::{MemoryPolicyStore, PolicyStore, SqlitePolicyStore};
pub use types::*;
