//! Probe requests and their cache fingerprints

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::{IdentifierKind, Platform};

/// One platform-identifier existence check
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub platform: String,
    /// Normalized identifier
    pub identifier: String,
    pub kind: IdentifierKind,
}

impl ProbeRequest {
    /// Build a request, normalizing the identifier for its kind
    pub fn new(platform: &Platform, identifier: &str, kind: IdentifierKind) -> Self {
        Self {
            platform: platform.name.clone(),
            identifier: kind.normalize(identifier),
            kind,
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_request(self)
    }
}

/// Deterministic fingerprint of a probe, the sole cache index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_request(request: &ProbeRequest) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"probe:");
        hasher.update(request.kind.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(request.platform.to_lowercase().as_bytes());
        hasher.update(b":");
        hasher.update(request.identifier.to_lowercase().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough for log lines
        f.write_str(&self.0[..16.min(self.0.len())])
    }
}
