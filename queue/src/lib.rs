//! Fair multi-tenant queue
//!
//! Admission control and scheduling for the exchange. Items are grouped
//! by `(priority, tenant)`: the scheduler always serves the highest
//! priority band with eligible work, visits tenants within a band
//! round-robin, and keeps strict FIFO within a tenant. Tenants at their
//! concurrency cap are skipped without losing their place. Three quota
//! kinds bound each tenant: concurrent runs (checked at dequeue), pending
//! items (checked at enqueue), and requests per sliding window (checked
//! at enqueue).

pub mod quotas;
pub mod scheduler;
pub mod types;

pub use quotas::TenantQuotas;
pub use scheduler::FairQueue;
pub use types::{QueueItem, QueueStats, TenantQueueStats};
