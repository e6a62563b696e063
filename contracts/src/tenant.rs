//! Tenant context
//!
//! Every inbound request resolves to exactly one tenant. A missing tenant
//! header resolves to `default`; cross-tenant reads require the admin
//! marker.

use serde::{Deserialize, Serialize};

/// The tenant a request runs under when no header is supplied.
pub const DEFAULT_TENANT: &str = "default";

/// Resolved identity for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub is_admin: bool,
    pub source_ip: Option<String>,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: None,
            is_admin: false,
            source_ip: None,
        }
    }

    /// Resolve from optional header values, falling back to the default
    /// tenant.
    pub fn from_headers(
        tenant: Option<&str>,
        user: Option<&str>,
        admin: Option<&str>,
        source_ip: Option<String>,
    ) -> Self {
        Self {
            tenant_id: tenant
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(DEFAULT_TENANT)
                .to_string(),
            user_id: user.map(str::to_string),
            is_admin: admin.map(|a| a.eq_ignore_ascii_case("true")).unwrap_or(false),
            source_ip,
        }
    }

    /// Whether this context may read records owned by `tenant_id`.
    pub fn can_read(&self, tenant_id: &str) -> bool {
        self.is_admin || self.tenant_id == tenant_id
    }
}

impl Default for TenantContext {
    fn default() -> Self {
        Self::new(DEFAULT_TENANT)
    }
}
