//! Semver compatibility checks

use crate::types::VersionRecord;
use semver::Version;
use serde::{Deserialize, Serialize};

/// Structured outcome of a compatibility check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub compatible: bool,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

impl CompatibilityReport {
    fn ok() -> Self {
        Self {
            compatible: true,
            issues: Vec::new(),
            suggestions: Vec::new(),
        }
    }
}

/// Compare a requested version against a registered record.
///
/// Compatible iff the major versions are equal and, when the record sets a
/// minimum-compatible floor, the requested version is not below it.
pub fn check_compatibility(record: &VersionRecord, requested: &str) -> CompatibilityReport {
    let current = match Version::parse(&record.version) {
        Ok(v) => v,
        Err(e) => {
            return CompatibilityReport {
                compatible: false,
                issues: vec![format!(
                    "registered version '{}' is not valid semver: {}",
                    record.version, e
                )],
                suggestions: vec!["re-register the artifact with a valid version".to_string()],
            }
        }
    };

    let requested_version = match Version::parse(requested) {
        Ok(v) => v,
        Err(e) => {
            return CompatibilityReport {
                compatible: false,
                issues: vec![format!("requested version '{}' is not valid semver: {}", requested, e)],
                suggestions: vec![format!("use the current version {}", current)],
            }
        }
    };

    let mut report = CompatibilityReport::ok();

    if requested_version.major != current.major {
        report.compatible = false;
        report.issues.push(format!(
            "major version mismatch: requested {} but current is {}",
            requested_version, current
        ));
        report
            .suggestions
            .push(format!("migrate to the {}.x line", current.major));
    }

    if let Some(min) = &record.min_compatible_version {
        match Version::parse(min) {
            Ok(floor) if requested_version < floor => {
                report.compatible = false;
                report.issues.push(format!(
                    "requested {} is below the minimum compatible version {}",
                    requested_version, floor
                ));
                report
                    .suggestions
                    .push(format!("upgrade to at least {}", floor));
            }
            Ok(_) => {}
            Err(e) => {
                report.issues.push(format!(
                    "minimum compatible version '{}' is not valid semver: {}",
                    min, e
                ));
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VersionKind;

    fn record(version: &str, min: Option<&str>) -> VersionRecord {
        let mut r = VersionRecord::new("agent-x", VersionKind::Agent, version);
        r.min_compatible_version = min.map(str::to_string);
        r
    }

    #[test]
    fn same_major_is_compatible() {
        let report = check_compatibility(&record("2.3.1", None), "2.0.0");
        assert!(report.compatible);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn major_mismatch_is_incompatible() {
        let report = check_compatibility(&record("2.3.1", None), "1.9.0");
        assert!(!report.compatible);
        assert!(report.issues[0].contains("major version mismatch"));
        assert!(report.suggestions[0].contains("2.x"));
    }

    #[test]
    fn below_min_compatible_floor_is_incompatible() {
        let report = check_compatibility(&record("2.3.1", Some("2.2.0")), "2.1.0");
        assert!(!report.compatible);
        assert!(report.issues[0].contains("minimum compatible"));
    }

    #[test]
    fn at_or_above_floor_is_compatible() {
        assert!(check_compatibility(&record("2.3.1", Some("2.2.0")), "2.2.0").compatible);
        assert!(check_compatibility(&record("2.3.1", Some("2.2.0")), "2.3.0").compatible);
    }

    #[test]
    fn invalid_requested_version_reports_issue() {
        let report = check_compatibility(&record("2.3.1", None), "not-a-version");
        assert!(!report.compatible);
        assert!(report.issues[0].contains("not valid semver"));
    }
}
