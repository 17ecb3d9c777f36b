//! Probe error taxonomy
//!
//! None of these ever abort a batch. The orchestrator turns every per-probe
//! failure into an [`IndeterminateReason`] on the result instead.

use thiserror::Error;

use crate::IndeterminateReason;

/// Errors raised while probing a single platform
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("Transient network error after {attempts} attempts: {message}")]
    TransientNetwork { attempts: u32, message: String },

    #[error("Fatal platform error: {0}")]
    FatalPlatform(String),

    #[error("Cache I/O error: {0}")]
    CacheIo(String),

    #[error("Ambiguous detection: {0}")]
    DetectionAmbiguous(String),

    #[error("Upstream rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },
}

impl ProbeError {
    /// The indeterminate outcome this error is surfaced as
    pub fn to_reason(&self) -> IndeterminateReason {
        match self {
            ProbeError::TransientNetwork { message, .. } => IndeterminateReason::Transient {
                message: message.clone(),
            },
            ProbeError::FatalPlatform(message) => IndeterminateReason::Fatal {
                message: message.clone(),
            },
            // Cache failures degrade to a miss long before a result is produced
            ProbeError::CacheIo(message) => IndeterminateReason::Transient {
                message: message.clone(),
            },
            ProbeError::DetectionAmbiguous(_) => IndeterminateReason::Ambiguous,
            ProbeError::RateLimitExceeded { .. } => IndeterminateReason::RateLimited,
        }
    }
}

/// Errors from loading platform catalogs
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Duplicate platform name: {0}")]
    Duplicate(String),

    #[error("Invalid platform {name}: {reason}")]
    Invalid { name: String, reason: String },
}
