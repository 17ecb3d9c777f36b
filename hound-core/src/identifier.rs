//! Identifier kinds and normalization
//!
//! Identifiers are normalized once before fingerprinting so that `Alice@Example.com`
//! and `alice@example.com` share one cache slot and one in-flight probe.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of identifier being probed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    #[default]
    Username,
    Email,
    Phone,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Username => "username",
            IdentifierKind::Email => "email",
            IdentifierKind::Phone => "phone",
        }
    }

    /// Guess the kind of a raw identifier
    pub fn detect(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.contains('@') && !trimmed.starts_with('@') {
            return IdentifierKind::Email;
        }

        let digits = trimmed.chars().filter(|c| c.is_ascii_digit()).count();
        let phone_like = trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' ' | '.'));
        if phone_like && digits >= 7 {
            return IdentifierKind::Phone;
        }

        IdentifierKind::Username
    }

    /// Normalize a raw identifier of this kind
    pub fn normalize(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        match self {
            IdentifierKind::Username => trimmed.trim_start_matches('@').to_string(),
            IdentifierKind::Email => trimmed.to_lowercase(),
            IdentifierKind::Phone => normalize_phone(trimmed),
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentifierKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "username" | "user" => Ok(IdentifierKind::Username),
            "email" | "mail" => Ok(IdentifierKind::Email),
            "phone" | "tel" => Ok(IdentifierKind::Phone),
            other => Err(format!("unknown identifier kind: {}", other)),
        }
    }
}

/// Strip formatting from a phone number, keeping a leading `+`
fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if raw.starts_with('+') {
        format!("+{}", digits)
    } else {
        digits
    }
}

/// Format variations tried, in order, when probing a phone number
///
/// At most three variations are produced and duplicates are dropped.
pub fn phone_variations(raw: &str) -> Vec<String> {
    let normalized = normalize_phone(raw.trim());
    let digits = normalized.trim_start_matches('+').to_string();
    if digits.is_empty() {
        return Vec::new();
    }

    let mut candidates = vec![format!("+{}", digits), digits.clone()];
    // North American numbers are commonly searched without the country code
    if digits.len() == 11 && digits.starts_with('1') {
        candidates.push(digits[1..].to_string());
    }

    let mut unique = Vec::new();
    for candidate in candidates {
        if !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique.truncate(3);
    unique
}
