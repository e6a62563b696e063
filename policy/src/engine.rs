//! Policy evaluation engine
//!
//! Decision procedure: collect enabled policies applicable to the
//! request's tenant (global plus tenant-scoped), sort ascending by
//! priority number, and scan in order. The first policy whose
//! constraints all hold decides the outcome; a matching deny halts the
//! scan immediately. If nothing matches, the default is deny. Explicit
//! denies must therefore sit at lower priority numbers than any allow
//! they are meant to override.

use crate::audit::{record_best_effort, AuditEntry, AuditSink};
use crate::cache::PolicyCache;
use crate::conditions::evaluate_set;
use crate::restrictions::{ip_allows, time_allows};
use crate::types::*;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

pub struct PolicyEngine {
    cache: Arc<PolicyCache>,
    audit: Arc<dyn AuditSink>,
}

impl PolicyEngine {
    pub fn new(cache: Arc<PolicyCache>, audit: Arc<dyn AuditSink>) -> Self {
        Self { cache, audit }
    }

    pub fn cache(&self) -> &Arc<PolicyCache> {
        &self.cache
    }

    /// Evaluate a request. Deterministic for a fixed policy set and
    /// request; the only side effect is the audit write.
    pub async fn evaluate(&self, request: &AccessRequest) -> Decision {
        let started = Instant::now();
        let policies = self.cache.applicable(&request.tenant_id).await;
        let now = Utc::now();

        let mut considered = Vec::new();
        let mut decision: Option<(&Policy, bool)> = None;

        for policy in &policies {
            considered.push(policy.id);
            if !Self::matches(policy, request, now) {
                continue;
            }

            match policy.effect {
                PolicyEffect::Deny => {
                    // Deny wins and halts the scan.
                    decision = Some((policy, false));
                    break;
                }
                PolicyEffect::Allow => {
                    decision = Some((policy, true));
                    break;
                }
            }
        }

        let elapsed_us = started.elapsed().as_micros() as u64;
        let (allowed, matched_policy, matched_policy_name, reason) = match decision {
            Some((policy, allowed)) => (
                allowed,
                Some(policy.id),
                Some(policy.name.clone()),
                format!(
                    "policy '{}' ({}) matched",
                    policy.name,
                    policy.effect.as_str()
                ),
            ),
            None => (
                false,
                None,
                None,
                "no policy matched; default deny".to_string(),
            ),
        };

        debug!(
            "Policy evaluation tenant={} action={} allowed={} ({})",
            request.tenant_id, request.action, allowed, reason
        );

        record_best_effort(
            self.audit.as_ref(),
            AuditEntry {
                id: Uuid::new_v4(),
                tenant_id: request.tenant_id.clone(),
                subject_id: request
                    .subject
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                resource: request
                    .resource
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                action: request.action.clone(),
                allowed,
                matched_policies: matched_policy.into_iter().collect(),
                elapsed_us,
                created_at: now,
            },
        )
        .await;

        Decision {
            allowed,
            matched_policy,
            matched_policy_name,
            considered,
            elapsed_us,
            reason,
        }
    }

    /// Whether every constraint of a policy holds for the request.
    fn matches(policy: &Policy, request: &AccessRequest, now: chrono::DateTime<Utc>) -> bool {
        if let Some(time) = &policy.time {
            if !time_allows(time, now) {
                return false;
            }
        }

        if let Some(ip) = &policy.ip {
            if !ip_allows(ip, request.source_ip()) {
                return false;
            }
        }

        if !evaluate_set(&policy.subject, &request.subject) {
            return false;
        }
        if !evaluate_set(&policy.resource, &request.resource) {
            return false;
        }
        if let Some(environment) = &policy.environment {
            if !evaluate_set(environment, &request.environment) {
                return false;
            }
        }

        policy.actions.permits(&request.action)
    }
}
