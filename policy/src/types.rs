//! Policy and access-request types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Allow or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEffect {
    Allow,
    Deny,
}

impl PolicyEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyEffect::Allow => "allow",
            PolicyEffect::Deny => "deny",
        }
    }
}

/// How a condition set combines its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Every condition must hold.
    All,
    /// At least one condition must hold.
    Any,
}

impl Default for MatchMode {
    fn default() -> Self {
        MatchMode::All
    }
}

/// Comparison operators for conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    In,
    NotIn,
    GreaterThan,
    LessThan,
    Between,
    MatchesRegex,
    StartsWith,
    EndsWith,
    IsNull,
    IsNotNull,
}

/// One attribute condition. `attribute` is a dot path resolved against
/// the relevant request section (subject, resource, or environment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub attribute: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// A condition set with its own combination mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionSet {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub match_mode: MatchMode,
}

/// Action allow/deny lists. `allowed` containing `*` matches any action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionRules {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub denied: Vec<String>,
}

impl ActionRules {
    pub fn permits(&self, action: &str) -> bool {
        if self.denied.iter().any(|a| a == action) {
            return false;
        }
        self.allowed.iter().any(|a| a == "*" || a == action)
    }
}

/// Wall-clock validity constraints. Hour windows where `start > end`
/// wrap around midnight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeRestrictions {
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    /// Allowed days of week, 0 = Sunday .. 6 = Saturday. Empty = all.
    #[serde(default)]
    pub allowed_days: Vec<u8>,
    /// Allowed hours [start, end], inclusive start, exclusive end.
    pub hour_window: Option<(u8, u8)>,
    /// Fixed UTC offset in minutes the day/hour checks are evaluated in.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// CIDR allow/block lists. Block wins; a non-empty allow list requires a
/// match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpRestrictions {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub block: Vec<String>,
}

/// One ABAC policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub name: String,
    /// None scopes the policy globally.
    pub tenant_id: Option<String>,
    /// Lower number = higher precedence.
    pub priority: i32,
    pub effect: PolicyEffect,
    pub enabled: bool,
    #[serde(default)]
    pub subject: ConditionSet,
    #[serde(default)]
    pub resource: ConditionSet,
    #[serde(default)]
    pub actions: ActionRules,
    #[serde(default)]
    pub environment: Option<ConditionSet>,
    #[serde(default)]
    pub time: Option<TimeRestrictions>,
    #[serde(default)]
    pub ip: Option<IpRestrictions>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    pub fn new(name: impl Into<String>, effect: PolicyEffect, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            tenant_id: None,
            priority,
            effect,
            enabled: true,
            subject: ConditionSet::default(),
            resource: ConditionSet::default(),
            actions: ActionRules {
                allowed: vec!["*".to_string()],
                denied: Vec::new(),
            },
            environment: None,
            time: None,
            ip: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One access request to evaluate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub tenant_id: String,
    /// Subject attributes (id, roles, plan, ...).
    pub subject: serde_json::Value,
    /// Resource attributes (type, id, owner, ...).
    pub resource: serde_json::Value,
    pub action: String,
    /// Environment attributes (ip, user_agent, ...).
    #[serde(default)]
    pub environment: serde_json::Value,
}

impl AccessRequest {
    pub fn source_ip(&self) -> Option<&str> {
        self.environment.get("ip").and_then(|v| v.as_str())
    }
}

/// The outcome of an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    /// Policy that decided, when any matched.
    pub matched_policy: Option<Uuid>,
    pub matched_policy_name: Option<String>,
    /// Ids of every policy considered, in scan order.
    pub considered: Vec<Uuid>,
    pub elapsed_us: u64,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_rules_wildcard_and_deny_list() {
        let rules = ActionRules {
            allowed: vec!["*".to_string()],
            denied: vec!["delete".to_string()],
        };
        assert!(rules.permits("execute"));
        assert!(!rules.permits("delete"));

        let explicit = ActionRules {
            allowed: vec!["execute".to_string()],
            denied: Vec::new(),
        };
        assert!(explicit.permits("execute"));
        assert!(!explicit.permits("read"));
    }
}
