//! Orchestrator
//!
//! Single entry point for execution. Every request passes the same
//! pre-check chain (schema validation, policy, version lifecycle,
//! availability, quota admission), becomes a job, and is dispatched by
//! the worker pool to an in-process agent or through the external
//! proxy. State transitions are broadcast through the stream hub,
//! appended to provenance, and delivered to webhooks on terminal
//! transitions. Outbound payloads cross the PII boundary both ways.

pub mod agents;
pub mod catalog;
pub mod service;
pub mod webhook;
pub mod worker;

pub use agents::{Agent, AgentOutput, AgentRegistry, AgentRuntime};
pub use catalog::{CatalogQuery, Catalog};
pub use service::{Orchestrator, SubmitRequest, SubmitResponse};
pub use webhook::WebhookDispatcher;
pub use worker::WorkerPool;
