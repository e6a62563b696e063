//! External agent registry and proxy
//!
//! The registry owns each remote agent's config and runtime state
//! (health, circuit breaker, rolling metrics) and is the only mutator of
//! that state. The proxy performs outbound execution through the
//! registry's availability gate, with retries, exponential backoff with
//! jitter, and streaming passthrough.

pub mod backoff;
pub mod circuit;
pub mod proxy;
pub mod registry;
pub mod types;

pub use backoff::backoff_delay;
pub use proxy::ExternalAgentProxy;
pub use registry::ExternalAgentRegistry;
pub use types::*;
