//! Shared contracts for the Agent Exchange
//!
//! Domain types crossing crate boundaries live here: the error taxonomy,
//! the stream event model, agent metadata, and tenant context. Keeping them
//! in one dependency-light crate avoids cycles between the runtime crates.

pub mod agent;
pub mod error;
pub mod events;
pub mod tenant;

pub use agent::{AgentCard, AgentCategory, AgentMetadata, AgentTier, PricingHint};
pub use error::{ErrorCode, ExchangeError};
pub use events::{StreamEvent, StreamEventType};
pub use tenant::TenantContext;
