//! Platform reference records
//!
//! A platform is immutable catalog data: where to probe, how to decide existence,
//! and which identifier kinds it accepts. The core only ever reads these.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::IdentifierKind;

/// How a platform reveals whether an identifier exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Map the HTTP status onto exists / not-exists sets
    #[default]
    StatusCode,
    /// Test the response body against exists / not-exists regexes
    Pattern,
}

/// Platform category tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlatformCategory {
    SocialMedia,
    Professional,
    Dating,
    Gaming,
    Forums,
    Adult,
    Blogging,
    Photography,
    Messaging,
    Streaming,
    Crypto,
    Shopping,
    Email,
    Phone,
    #[default]
    Other,
}

impl PlatformCategory {
    pub const ALL: [PlatformCategory; 15] = [
        PlatformCategory::SocialMedia,
        PlatformCategory::Professional,
        PlatformCategory::Dating,
        PlatformCategory::Gaming,
        PlatformCategory::Forums,
        PlatformCategory::Adult,
        PlatformCategory::Blogging,
        PlatformCategory::Photography,
        PlatformCategory::Messaging,
        PlatformCategory::Streaming,
        PlatformCategory::Crypto,
        PlatformCategory::Shopping,
        PlatformCategory::Email,
        PlatformCategory::Phone,
        PlatformCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformCategory::SocialMedia => "social_media",
            PlatformCategory::Professional => "professional",
            PlatformCategory::Dating => "dating",
            PlatformCategory::Gaming => "gaming",
            PlatformCategory::Forums => "forums",
            PlatformCategory::Adult => "adult",
            PlatformCategory::Blogging => "blogging",
            PlatformCategory::Photography => "photography",
            PlatformCategory::Messaging => "messaging",
            PlatformCategory::Streaming => "streaming",
            PlatformCategory::Crypto => "crypto",
            PlatformCategory::Shopping => "shopping",
            PlatformCategory::Email => "email",
            PlatformCategory::Phone => "phone",
            PlatformCategory::Other => "other",
        }
    }
}

impl fmt::Display for PlatformCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace(['-', ' '], "_");
        PlatformCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown platform category: {}", s.trim()))
    }
}

/// A platform that can be probed for identifiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    /// Unique human-readable name
    pub name: String,
    /// Username URL template with an `{identifier}` (or `{username}`) placeholder
    pub url: String,
    /// Email lookup URL template, if the platform supports email probes
    #[serde(default)]
    pub email_url: Option<String>,
    /// Phone lookup URL template, if the platform supports phone probes
    #[serde(default)]
    pub phone_url: Option<String>,
    #[serde(default)]
    pub detection: DetectionMethod,
    #[serde(default)]
    pub category: PlatformCategory,
    #[serde(default)]
    pub nsfw: bool,
    /// Identifier kinds this platform accepts
    #[serde(default = "default_kinds")]
    pub kinds: Vec<IdentifierKind>,
    /// Per-platform request timeout override in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Multiplier applied to the fetcher's refill rate for this target
    #[serde(default = "default_rate_hint")]
    pub rate_hint: f64,
    /// Status codes meaning "exists"
    #[serde(default = "default_exists_status")]
    pub exists_status: Vec<u16>,
    /// Status codes meaning "does not exist"
    #[serde(default = "default_absent_status")]
    pub absent_status: Vec<u16>,
    /// Body regex meaning "exists" (pattern detection)
    #[serde(default)]
    pub exists_pattern: Option<String>,
    /// Body regex meaning "does not exist" (pattern detection)
    #[serde(default)]
    pub absent_pattern: Option<String>,
    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Known-nonexistent identifier used to calibrate the checker
    #[serde(default)]
    pub sentinel: Option<String>,
    /// Metadata field -> regex with one capture group, applied to found pages
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_kinds() -> Vec<IdentifierKind> {
    vec![IdentifierKind::Username]
}

fn default_rate_hint() -> f64 {
    1.0
}

fn default_exists_status() -> Vec<u16> {
    vec![200]
}

fn default_absent_status() -> Vec<u16> {
    vec![404]
}

fn default_active() -> bool {
    true
}

const PLACEHOLDERS: &[&str] = &["{identifier}", "{username}", "{email}", "{phone}"];

impl Platform {
    /// Minimal status-code platform, mostly useful for tests and ad-hoc catalogs
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            email_url: None,
            phone_url: None,
            detection: DetectionMethod::StatusCode,
            category: PlatformCategory::Other,
            nsfw: false,
            kinds: default_kinds(),
            timeout_secs: None,
            rate_hint: default_rate_hint(),
            exists_status: default_exists_status(),
            absent_status: default_absent_status(),
            exists_pattern: None,
            absent_pattern: None,
            headers: BTreeMap::new(),
            sentinel: None,
            metadata: BTreeMap::new(),
            active: true,
        }
    }

    pub fn with_category(mut self, category: PlatformCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_nsfw(mut self, nsfw: bool) -> Self {
        self.nsfw = nsfw;
        self
    }

    pub fn with_patterns(mut self, exists: Option<&str>, absent: Option<&str>) -> Self {
        self.detection = DetectionMethod::Pattern;
        self.exists_pattern = exists.map(str::to_string);
        self.absent_pattern = absent.map(str::to_string);
        self
    }

    pub fn with_kinds(mut self, kinds: &[IdentifierKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    pub fn with_sentinel(mut self, sentinel: &str) -> Self {
        self.sentinel = Some(sentinel.to_string());
        self
    }

    pub fn with_rate_hint(mut self, hint: f64) -> Self {
        self.rate_hint = hint;
        self
    }

    /// Whether this platform accepts identifiers of `kind`
    pub fn supports(&self, kind: IdentifierKind) -> bool {
        self.kinds.contains(&kind) && self.template_for(kind).is_some()
    }

    /// URL template used for `kind`
    pub fn template_for(&self, kind: IdentifierKind) -> Option<&str> {
        match kind {
            IdentifierKind::Username => Some(self.url.as_str()),
            IdentifierKind::Email => self.email_url.as_deref().or(Some(self.url.as_str())),
            IdentifierKind::Phone => self.phone_url.as_deref().or(Some(self.url.as_str())),
        }
    }

    /// Build the probe URL for an identifier, percent-encoding it
    pub fn build_url(&self, identifier: &str, kind: IdentifierKind) -> String {
        let template = self.template_for(kind).unwrap_or(&self.url);
        let encoded = urlencoding::encode(identifier);
        PLACEHOLDERS
            .iter()
            .fold(template.to_string(), |url, placeholder| url.replace(placeholder, &encoded))
    }

    /// Check the record is probe-able
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("empty name".to_string());
        }
        if !PLACEHOLDERS.iter().any(|p| self.url.contains(p)) {
            return Err(format!("url template has no placeholder: {}", self.url));
        }
        if self.detection == DetectionMethod::Pattern
            && self.exists_pattern.is_none()
            && self.absent_pattern.is_none()
        {
            return Err("pattern detection without any pattern".to_string());
        }
        if !(self.rate_hint.is_finite() && self.rate_hint > 0.0) {
            return Err(format!("rate_hint must be positive, got {}", self.rate_hint));
        }
        Ok(())
    }
}
