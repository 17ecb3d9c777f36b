//! Profile results and cache entries
//!
//! A [`ProfileResult`] is produced once by a checker and never mutated afterwards.
//! Only results with `exists == true` flow into correlation and graph building.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{IdentifierKind, ProbeRequest};

/// How much a result can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    #[default]
    High,
    Low,
}

/// Why a probe produced neither a confirmed match nor a confirmed absence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IndeterminateReason {
    /// Both or neither of the exists / not-exists patterns matched
    Ambiguous,
    /// Status outside both declared sets
    UnexpectedStatus { status: u16 },
    /// Retries exhausted on timeouts or 5xx
    Transient { message: String },
    /// Non-retriable failure (DNS, TLS, invalid URL)
    Fatal { message: String },
    /// Upstream kept answering 429
    RateLimited,
    /// The batch deadline passed before the probe finished
    Timeout,
}

impl IndeterminateReason {
    /// Whether this reason counts as an error in batch summaries
    pub fn is_error(&self) -> bool {
        !matches!(
            self,
            IndeterminateReason::Ambiguous | IndeterminateReason::UnexpectedStatus { .. }
        )
    }
}

impl fmt::Display for IndeterminateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndeterminateReason::Ambiguous => write!(f, "ambiguous detection"),
            IndeterminateReason::UnexpectedStatus { status } => {
                write!(f, "unexpected status {}", status)
            }
            IndeterminateReason::Transient { message } => write!(f, "transient failure: {}", message),
            IndeterminateReason::Fatal { message } => write!(f, "fatal failure: {}", message),
            IndeterminateReason::RateLimited => write!(f, "rate limited"),
            IndeterminateReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// Outcome of probing one platform for one identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileResult {
    pub platform: String,
    pub identifier: String,
    pub kind: IdentifierKind,
    /// Resolved profile URL
    pub url: String,
    pub exists: bool,
    pub confidence: Confidence,
    /// Set when the outcome is neither found nor confirmed absent
    pub indeterminate: Option<IndeterminateReason>,
    /// The platform's sentinel probe also read as "exists"
    #[serde(default)]
    pub unreliable: bool,
    pub status: Option<u16>,
    /// Free-form attributes pulled from the profile page
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub latency_ms: u64,
    pub checked_at: DateTime<Utc>,
}

impl ProfileResult {
    pub fn found(request: &ProbeRequest, url: &str) -> Self {
        Self::base(request, url, true)
    }

    pub fn absent(request: &ProbeRequest, url: &str) -> Self {
        Self::base(request, url, false)
    }

    pub fn indeterminate(request: &ProbeRequest, url: &str, reason: IndeterminateReason) -> Self {
        let mut result = Self::base(request, url, false);
        result.confidence = Confidence::Low;
        result.indeterminate = Some(reason);
        result
    }

    fn base(request: &ProbeRequest, url: &str, exists: bool) -> Self {
        Self {
            platform: request.platform.clone(),
            identifier: request.identifier.clone(),
            kind: request.kind,
            url: url.to_string(),
            exists,
            confidence: Confidence::High,
            indeterminate: None,
            unreliable: false,
            status: None,
            metadata: BTreeMap::new(),
            latency_ms: 0,
            checked_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Downgrade a positive from a platform whose sentinel also read as present
    pub fn mark_unreliable(mut self) -> Self {
        self.unreliable = true;
        self.confidence = Confidence::Low;
        self
    }

    pub fn is_indeterminate(&self) -> bool {
        self.indeterminate.is_some()
    }

    /// Found or confirmed absent, as opposed to indeterminate
    pub fn is_conclusive(&self) -> bool {
        self.indeterminate.is_none()
    }

    pub fn profile_ref(&self) -> ProfileRef {
        ProfileRef {
            platform: self.platform.clone(),
            identifier: self.identifier.clone(),
        }
    }

    /// One-line user-facing description
    pub fn describe(&self) -> String {
        match (&self.indeterminate, self.exists) {
            (Some(reason), _) => format!("{}: no result ({})", self.platform, reason),
            (None, true) if self.confidence == Confidence::Low => {
                format!("{}: found (low confidence) {}", self.platform, self.url)
            }
            (None, true) => format!("{}: found {}", self.platform, self.url),
            (None, false) => format!("{}: not found", self.platform),
        }
    }
}

/// Stable reference to a profile: one identifier on one platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileRef {
    pub platform: String,
    pub identifier: String,
}

impl ProfileRef {
    /// Graph node id for this profile. Platform names are unique regardless of
    /// case; identifiers are kept verbatim since usernames are probed as given.
    pub fn node_id(&self) -> String {
        format!("profile:{}:{}", self.platform.to_lowercase(), self.identifier)
    }
}

impl fmt::Display for ProfileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identifier, self.platform)
    }
}

/// Value held by a cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CachedValue {
    /// A found profile
    Profile { result: ProfileResult },
    /// The platform confirmed the identifier does not exist
    ConfirmedAbsent {
        platform: String,
        url: String,
        checked_at: DateTime<Utc>,
    },
}

impl CachedValue {
    /// Cacheable form of a result; indeterminate outcomes are never cached
    pub fn from_result(result: &ProfileResult) -> Option<Self> {
        if result.is_indeterminate() {
            return None;
        }
        if result.exists {
            Some(CachedValue::Profile {
                result: result.clone(),
            })
        } else {
            Some(CachedValue::ConfirmedAbsent {
                platform: result.platform.clone(),
                url: result.url.clone(),
                checked_at: result.checked_at,
            })
        }
    }

    /// Rebuild the result this value stands for
    pub fn to_result(&self, request: &ProbeRequest) -> ProfileResult {
        match self {
            CachedValue::Profile { result } => result.clone(),
            CachedValue::ConfirmedAbsent { url, checked_at, .. } => {
                let mut result = ProfileResult::absent(request, url);
                result.checked_at = *checked_at;
                result
            }
        }
    }
}

/// A cached value with its insertion time and TTL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: CachedValue,
    pub inserted_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn new(value: CachedValue, ttl_secs: u64) -> Self {
        Self {
            value,
            inserted_at: Utc::now(),
            ttl_secs,
        }
    }

    /// `None` when the TTL runs past the representable time range
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = i64::try_from(self.ttl_secs).ok()?;
        self.inserted_at.checked_add_signed(TimeDelta::try_seconds(ttl)?)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }

    /// Whole seconds left before expiry, saturating at `u64::MAX`
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        match self.expires_at() {
            Some(at) => (at - now).num_seconds().max(0) as u64,
            None => u64::MAX,
        }
    }
}
