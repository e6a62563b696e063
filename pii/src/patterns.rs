//! PII pattern battery
//!
//! The scan order is fixed and load-bearing: bank-account numbers overlap
//! credit-card numbers (and IPv4 overlaps dotted dates), so broader
//! patterns run after the narrower ones have already claimed their
//! matches.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Categories of sensitive data the battery detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiCategory {
    Email,
    Phone,
    Ssn,
    CreditCard,
    Ipv4,
    DateOfBirth,
    ApiKey,
    Passport,
    BankAccount,
}

impl PiiCategory {
    /// Label embedded in minted tokens: `__<LABEL>_<session><counter>__`.
    pub fn token_label(&self) -> &'static str {
        match self {
            PiiCategory::Email => "EMAIL",
            PiiCategory::Phone => "PHONE",
            PiiCategory::Ssn => "SSN",
            PiiCategory::CreditCard => "CREDIT_CARD",
            PiiCategory::Ipv4 => "IPV4",
            PiiCategory::DateOfBirth => "DOB",
            PiiCategory::ApiKey => "API_KEY",
            PiiCategory::Passport => "PASSPORT",
            PiiCategory::BankAccount => "BANK_ACCOUNT",
        }
    }
}

/// One compiled pattern in the battery.
pub struct PiiPattern {
    pub category: PiiCategory,
    pub regex: Regex,
}

/// The battery, in scan order. Do not reorder.
pub static PATTERNS: Lazy<Vec<PiiPattern>> = Lazy::new(|| {
    let table: &[(PiiCategory, &str)] = &[
        (
            PiiCategory::Email,
            r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        ),
        (
            PiiCategory::Phone,
            r"\b(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]\d{3}[-. ]\d{4}\b",
        ),
        (PiiCategory::Ssn, r"\b\d{3}-\d{2}-\d{4}\b"),
        (
            PiiCategory::CreditCard,
            r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b",
        ),
        (PiiCategory::Ipv4, r"\b(?:\d{1,3}\.){3}\d{1,3}\b"),
        (
            PiiCategory::DateOfBirth,
            r"\b(?:19|20)\d{2}[-/](?:0?[1-9]|1[0-2])[-/](?:0?[1-9]|[12]\d|3[01])\b",
        ),
        (
            PiiCategory::ApiKey,
            r"\b(?:sk|pk|api|key)[-_][A-Za-z0-9]{16,}\b",
        ),
        (PiiCategory::Passport, r"\b[A-Z]{1,2}\d{7,9}\b"),
        (PiiCategory::BankAccount, r"\b\d{8,17}\b"),
    ];

    table
        .iter()
        .map(|(category, pattern)| PiiPattern {
            category: *category,
            // Battery patterns are static and verified by tests; a failure
            // to compile is a programming error caught at first use.
            regex: Regex::new(pattern).unwrap_or_else(|e| {
                panic!("invalid PII pattern for {:?}: {}", category, e)
            }),
        })
        .collect()
});

#[cfg(test)]
mod tests {
    use super::*;

    fn category_of(text: &str) -> Option<PiiCategory> {
        PATTERNS
            .iter()
            .find(|p| p.regex.is_match(text))
            .map(|p| p.category)
    }

    #[test]
    fn battery_compiles() {
        assert_eq!(PATTERNS.len(), 9);
    }

    #[test]
    fn email_detected_first() {
        assert_eq!(category_of("reach me at jo.doe@example.org"), Some(PiiCategory::Email));
    }

    #[test]
    fn phone_formats() {
        assert_eq!(category_of("call 555-123-4567"), Some(PiiCategory::Phone));
        assert_eq!(category_of("call (555) 123-4567"), Some(PiiCategory::Phone));
        assert_eq!(category_of("call +1 555 123 4567"), Some(PiiCategory::Phone));
    }

    #[test]
    fn credit_card_wins_over_bank_account() {
        // 16 consecutive digits satisfy both patterns; scan order must
        // classify them as a card.
        assert_eq!(category_of("4111111111111111"), Some(PiiCategory::CreditCard));
    }

    #[test]
    fn bank_account_still_reachable() {
        assert_eq!(category_of("account 12345678"), Some(PiiCategory::BankAccount));
    }

    #[test]
    fn ipv4_and_dob() {
        assert_eq!(category_of("host 10.0.0.1"), Some(PiiCategory::Ipv4));
        assert_eq!(category_of("born 1990-04-17"), Some(PiiCategory::DateOfBirth));
    }

    #[test]
    fn api_key_and_passport() {
        assert_eq!(
            category_of("sk-abcdefghijklmnop1234"),
            Some(PiiCategory::ApiKey)
        );
        assert_eq!(category_of("passport AB1234567"), Some(PiiCategory::Passport));
    }
}
