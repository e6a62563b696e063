//! Shared application state and tenant extraction

use agent_exchange_contracts::TenantContext;
use agent_exchange_orchestrator::Orchestrator;
use agent_exchange_policy::PolicyCache;
use axum::http::HeaderMap;
use std::sync::Arc;

/// State threaded through every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub policy_cache: Arc<PolicyCache>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, policy_cache: Arc<PolicyCache>) -> Self {
        Self {
            orchestrator,
            policy_cache,
            started_at: chrono::Utc::now(),
        }
    }
}

/// Resolve the tenant context from request headers. A missing tenant
/// header falls back to `default`.
pub fn tenant_from_headers(headers: &HeaderMap) -> TenantContext {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    TenantContext::from_headers(
        header("x-tenant-id"),
        header("x-user-id"),
        header("x-admin"),
        header("x-forwarded-for")
            .map(|raw| raw.split(',').next().unwrap_or(raw).trim().to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn headers_resolve_tenant_user_and_admin() {
        let mut headers = HeaderMap::new();
        headers.insert("x-tenant-id", HeaderValue::from_static("acme"));
        headers.insert("x-user-id", HeaderValue::from_static("alice"));
        headers.insert("x-admin", HeaderValue::from_static("true"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.1.2.3, 172.16.0.1"));

        let ctx = tenant_from_headers(&headers);
        assert_eq!(ctx.tenant_id, "acme");
        assert_eq!(ctx.user_id.as_deref(), Some("alice"));
        assert!(ctx.is_admin);
        assert_eq!(ctx.source_ip.as_deref(), Some("10.1.2.3"));
    }

    #[test]
    fn missing_headers_fall_back_to_default_tenant() {
        let ctx = tenant_from_headers(&HeaderMap::new());
        assert_eq!(ctx.tenant_id, "default");
        assert!(!ctx.is_admin);
        assert!(ctx.source_ip.is_none());
    }
}
