//! Time and IP restriction checks

use crate::types::{IpRestrictions, TimeRestrictions};
use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use std::net::Ipv4Addr;
use tracing::warn;

/// Whether a policy's time restrictions hold at `now`.
pub fn time_allows(restrictions: &TimeRestrictions, now: DateTime<Utc>) -> bool {
    if let Some(from) = restrictions.valid_from {
        if now < from {
            return false;
        }
    }
    if let Some(until) = restrictions.valid_until {
        if now > until {
            return false;
        }
    }

    let local = match FixedOffset::east_opt(restrictions.utc_offset_minutes * 60) {
        Some(offset) => now.with_timezone(&offset),
        None => {
            warn!(
                "Invalid UTC offset {} minutes in time restriction",
                restrictions.utc_offset_minutes
            );
            return false;
        }
    };

    if !restrictions.allowed_days.is_empty() {
        let day = local.weekday().num_days_from_sunday() as u8;
        if !restrictions.allowed_days.contains(&day) {
            return false;
        }
    }

    if let Some((start, end)) = restrictions.hour_window {
        let hour = local.hour() as u8;
        let inside = if start <= end {
            hour >= start && hour < end
        } else {
            // Overnight window, e.g. 22..6.
            hour >= start || hour < end
        };
        if !inside {
            return false;
        }
    }

    true
}

/// Whether a policy's IP restrictions hold for `ip`.
///
/// The block list is checked first; then a non-empty allow list requires a
/// match. An unparseable client address never passes a restricted policy.
pub fn ip_allows(restrictions: &IpRestrictions, ip: Option<&str>) -> bool {
    if restrictions.allow.is_empty() && restrictions.block.is_empty() {
        return true;
    }

    let Some(addr) = ip.and_then(|s| s.parse::<Ipv4Addr>().ok()) else {
        return false;
    };

    for cidr in &restrictions.block {
        if cidr_contains(cidr, addr) {
            return false;
        }
    }

    if restrictions.allow.is_empty() {
        return true;
    }
    restrictions.allow.iter().any(|cidr| cidr_contains(cidr, addr))
}

/// Membership test for dotted-quad CIDR notation. A bare address is
/// treated as /32. Malformed entries never match.
fn cidr_contains(cidr: &str, addr: Ipv4Addr) -> bool {
    let (network, prefix) = match cidr.split_once('/') {
        Some((network, prefix)) => {
            let Ok(prefix) = prefix.parse::<u8>() else {
                return false;
            };
            (network, prefix)
        }
        None => (cidr, 32),
    };
    if prefix > 32 {
        return false;
    }
    let Ok(network) = network.parse::<Ipv4Addr>() else {
        return false;
    };

    let mask: u32 = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    (u32::from(addr) & mask) == (u32::from(network) & mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cidr_membership() {
        let addr: Ipv4Addr = "10.1.2.3".parse().unwrap();
        assert!(cidr_contains("10.0.0.0/8", addr));
        assert!(cidr_contains("10.1.2.0/24", addr));
        assert!(!cidr_contains("10.1.3.0/24", addr));
        assert!(cidr_contains("10.1.2.3", addr));
        assert!(!cidr_contains("bogus/24", addr));
        assert!(!cidr_contains("10.0.0.0/40", addr));
    }

    #[test]
    fn block_list_wins_over_allow() {
        let restrictions = IpRestrictions {
            allow: vec!["10.0.0.0/8".to_string()],
            block: vec!["10.1.0.0/16".to_string()],
        };
        assert!(ip_allows(&restrictions, Some("10.2.0.1")));
        assert!(!ip_allows(&restrictions, Some("10.1.0.1")));
    }

    #[test]
    fn nonempty_allow_list_requires_match() {
        let restrictions = IpRestrictions {
            allow: vec!["192.168.0.0/16".to_string()],
            block: Vec::new(),
        };
        assert!(ip_allows(&restrictions, Some("192.168.4.4")));
        assert!(!ip_allows(&restrictions, Some("8.8.8.8")));
        assert!(!ip_allows(&restrictions, None));
    }

    #[test]
    fn unrestricted_passes_without_ip() {
        assert!(ip_allows(&IpRestrictions::default(), None));
    }

    #[test]
    fn validity_window() {
        let now = Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap();
        let mut restrictions = TimeRestrictions::default();
        assert!(time_allows(&restrictions, now));

        restrictions.valid_from = Some(Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap());
        assert!(!time_allows(&restrictions, now));

        restrictions.valid_from = Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        restrictions.valid_until = Some(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
        assert!(!time_allows(&restrictions, now));
    }

    #[test]
    fn hour_window_plain_and_overnight() {
        let mut restrictions = TimeRestrictions {
            hour_window: Some((9, 17)),
            ..Default::default()
        };

        let morning = Utc.with_ymd_and_hms(2026, 6, 15, 10, 0, 0).unwrap();
        let night = Utc.with_ymd_and_hms(2026, 6, 15, 22, 0, 0).unwrap();
        assert!(time_allows(&restrictions, morning));
        assert!(!time_allows(&restrictions, night));

        // Overnight range 22..6 admits 23:00 and 03:00 but not noon.
        restrictions.hour_window = Some((22, 6));
        let late = Utc.with_ymd_and_hms(2026, 6, 15, 23, 0, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2026, 6, 15, 3, 0, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap();
        assert!(time_allows(&restrictions, late));
        assert!(time_allows(&restrictions, early));
        assert!(!time_allows(&restrictions, noon));
    }

    #[test]
    fn day_of_week_in_local_offset() {
        // 2026-06-15 is a Monday (day 1). At UTC-5, 02:00 UTC is still
        // Sunday evening locally.
        let restrictions = TimeRestrictions {
            allowed_days: vec![0],
            utc_offset_minutes: -300,
            ..Default::default()
        };
        let utc_monday_early = Utc.with_ymd_and_hms(2026, 6, 15, 2, 0, 0).unwrap();
        assert!(time_allows(&restrictions, utc_monday_early));

        let weekday_only = TimeRestrictions {
            allowed_days: vec![1, 2, 3, 4, 5],
            ..Default::default()
        };
        assert!(time_allows(&weekday_only, utc_monday_early));
    }
}
