//! Engine configuration
//!
//! One TOML document with a section per layer. Every field is optional and
//! falls back to the built-in default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use hound_analysis::AnalysisConfig;
use hound_core::{DEFAULT_BATCH_TIMEOUT_SECS, DEFAULT_CONCURRENCY, MAX_CACHE_TTL_SECS};
use hound_net::{HttpConfig, RateLimitConfig};
use hound_probe::{CacheConfig, CalibrationPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Scatter-gather settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Global cap on concurrently running probes, shared by all batches
    pub concurrency: usize,
    pub batch_timeout_secs: u64,
    /// Probe declared sentinels when a checker is first built
    pub calibrate: bool,
    /// Invent a sentinel for platforms that declare none
    pub generate_sentinels: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            batch_timeout_secs: DEFAULT_BATCH_TIMEOUT_SECS,
            calibrate: true,
            generate_sentinels: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn calibration(&self) -> CalibrationPolicy {
        CalibrationPolicy {
            enabled: self.calibrate,
            generate: self.generate_sentinels,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub http: HttpConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub orchestrator: OrchestratorConfig,
    pub analysis: AnalysisConfig,
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.concurrency == 0 {
            return Err(ConfigError::Invalid("orchestrator.concurrency must be at least 1".into()));
        }
        if self.orchestrator.batch_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.batch_timeout_secs must be at least 1".into(),
            ));
        }
        if self.http.attempts == 0 {
            return Err(ConfigError::Invalid("http.attempts must be at least 1".into()));
        }
        if self.rate_limit.rate <= 0.0 || self.rate_limit.capacity < 1.0 {
            return Err(ConfigError::Invalid(
                "rate_limit needs rate > 0 and capacity >= 1".into(),
            ));
        }
        if self.cache.enabled && self.cache.l1_capacity == 0 {
            return Err(ConfigError::Invalid("cache.l1_capacity must be at least 1".into()));
        }
        if self.cache.l1_ttl_secs > MAX_CACHE_TTL_SECS || self.cache.l2_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "cache TTLs must not exceed {} seconds",
                MAX_CACHE_TTL_SECS
            )));
        }
        if !(0.0..=1.0).contains(&self.analysis.graph_threshold) {
            return Err(ConfigError::Invalid(
                "analysis.graph_threshold must lie in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.orchestrator, OrchestratorConfig::default());
        assert_eq!(config.orchestrator.concurrency, 100);
        assert_eq!(config.orchestrator.batch_timeout(), Duration::from_secs(120));
        assert_eq!(config.http.attempts, 3);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_sections_override() {
        let config = EngineConfig::from_toml_str(
            r#"
            [orchestrator]
            concurrency = 8
            generate_sentinels = true

            [cache]
            l1_capacity = 50
            dir = "/tmp/hound-cache"

            [analysis]
            graph_threshold = 0.7
            "#,
        )
        .unwrap();

        assert_eq!(config.orchestrator.concurrency, 8);
        assert_eq!(config.orchestrator.batch_timeout_secs, 120);
        assert!(config.orchestrator.calibration().generate);
        assert_eq!(config.cache.l1_capacity, 50);
        assert_eq!(config.cache.dir, Some(PathBuf::from("/tmp/hound-cache")));
        assert_eq!(config.analysis.graph_threshold, 0.7);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_toml_str("[orchestrator]\nconcurrency = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = EngineConfig::from_toml_str("[analysis]\ngraph_threshold = 2.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = EngineConfig::from_toml_str("[orchestrator\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_cache_ttl_bounded() {
        let err = EngineConfig::from_toml_str("[cache]\nl2_ttl_secs = 10000000000000").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = EngineConfig::from_toml_str("[cache]\nl1_ttl_secs = 400000000").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = EngineConfig::from_toml_str("[cache]\nl2_ttl_secs = 31536000").unwrap();
        assert_eq!(config.cache.l2_ttl_secs, 31_536_000);
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
