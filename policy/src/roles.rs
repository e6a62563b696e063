//! Role assignments
//!
//! A fixed role table maps role names to permission sets; assignments
//! bind `(tenant, subject)` to roles, optionally with an expiry. Expired
//! assignments are filtered on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A named role with its permission set. `*` grants everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub permissions: Vec<String>,
}

/// One `(tenant, subject) → role` binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: Uuid,
    pub tenant_id: String,
    pub subject_id: String,
    pub role: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RoleAssignment {
    pub fn active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| e > now).unwrap_or(true)
    }
}

/// In-memory role table with assignments.
pub struct RoleTable {
    roles: HashMap<String, Role>,
    assignments: RwLock<Vec<RoleAssignment>>,
}

impl RoleTable {
    /// The built-in role set.
    pub fn with_builtin_roles() -> Self {
        let roles = [
            Role {
                name: "admin".to_string(),
                permissions: vec!["*".to_string()],
            },
            Role {
                name: "operator".to_string(),
                permissions: vec![
                    "agents:execute".to_string(),
                    "agents:read".to_string(),
                    "jobs:read".to_string(),
                    "jobs:cancel".to_string(),
                ],
            },
            Role {
                name: "viewer".to_string(),
                permissions: vec!["agents:read".to_string(), "jobs:read".to_string()],
            },
        ];
        Self {
            roles: roles.into_iter().map(|r| (r.name.clone(), r)).collect(),
            assignments: RwLock::new(Vec::new()),
        }
    }

    pub async fn assign(
        &self,
        tenant_id: &str,
        subject_id: &str,
        role: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> RoleAssignment {
        let assignment = RoleAssignment {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            subject_id: subject_id.to_string(),
            role: role.to_string(),
            expires_at,
            created_at: Utc::now(),
        };
        self.assignments.write().await.push(assignment.clone());
        assignment
    }

    /// Active roles for a subject; expired assignments are skipped.
    pub async fn roles_of(&self, tenant_id: &str, subject_id: &str) -> Vec<String> {
        let now = Utc::now();
        self.assignments
            .read()
            .await
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.subject_id == subject_id && a.active(now))
            .map(|a| a.role.clone())
            .collect()
    }

    /// Whether any of the subject's roles carries the permission.
    pub async fn has_permission(
        &self,
        tenant_id: &str,
        subject_id: &str,
        permission: &str,
    ) -> bool {
        for role_name in self.roles_of(tenant_id, subject_id).await {
            if let Some(role) = self.roles.get(&role_name) {
                if role
                    .permissions
                    .iter()
                    .any(|p| p == "*" || p == permission)
                {
                    return true;
                }
            }
        }
        false
    }

    pub async fn revoke(&self, assignment_id: Uuid) -> bool {
        let mut assignments = self.assignments.write().await;
        let before = assignments.len();
        assignments.retain(|a| a.id != assignment_id);
        assignments.len() < before
    }
}
