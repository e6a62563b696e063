//! Types for the version registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of artifact a record versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionKind {
    Agent,
    Tool,
}

impl VersionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionKind::Agent => "agent",
            VersionKind::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(VersionKind::Agent),
            "tool" => Some(VersionKind::Tool),
            _ => None,
        }
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Active,
    Deprecated,
    Sunset,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Active => "active",
            VersionStatus::Deprecated => "deprecated",
            VersionStatus::Sunset => "sunset",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(VersionStatus::Active),
            "deprecated" => Some(VersionStatus::Deprecated),
            "sunset" => Some(VersionStatus::Sunset),
            _ => None,
        }
    }
}

/// One versioned artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: String,
    pub kind: VersionKind,
    pub version: String,
    pub status: VersionStatus,
    pub deprecated_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub replacement_id: Option<String>,
    pub sunset_date: Option<DateTime<Utc>>,
    pub min_compatible_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VersionRecord {
    pub fn new(id: impl Into<String>, kind: VersionKind, version: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            version: version.into(),
            status: VersionStatus::Active,
            deprecated_at: None,
            reason: None,
            replacement_id: None,
            sunset_date: None,
            min_compatible_version: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the sunset date has passed.
    pub fn sunset_due(&self, now: DateTime<Utc>) -> bool {
        self.sunset_date.map(|d| d < now).unwrap_or(false)
    }
}

/// Warning payload returned for deprecated-but-usable artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeprecationWarning {
    pub id: String,
    pub reason: Option<String>,
    pub replacement_id: Option<String>,
    pub sunset_date: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
}
