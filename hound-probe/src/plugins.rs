//! Checker registry and the plugin extension point
//!
//! Plugins are asked first, in registration order; a platform nobody claims gets
//! the built-in strategy for its detection method. Each platform's checker is
//! built (and calibrated) at most once per registry.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use hound_core::{DetectionMethod, Platform};
use hound_net::Fetcher;

use crate::{generated_sentinel, PatternChecker, PlatformChecker, StatusCodeChecker};

/// Errors from building a checker
#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("Invalid pattern for {platform} ({pattern}): {source}")]
    InvalidPattern {
        platform: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Unsupported platform: {0}")]
    Unsupported(String),

    #[error("Plugin {plugin} failed: {message}")]
    Plugin { plugin: String, message: String },
}

/// A registered capability that can build checkers for some platforms
#[async_trait]
pub trait CheckerPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, platform: &Platform) -> bool;

    async fn build(
        &self,
        platform: Arc<Platform>,
        fetcher: Arc<Fetcher>,
    ) -> Result<Arc<dyn PlatformChecker>, CheckerError>;
}

/// Sentinel calibration settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationPolicy {
    /// Probe declared sentinels at build time
    pub enabled: bool,
    /// Generate a sentinel for platforms that declare none
    pub generate: bool,
}

impl Default for CalibrationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            generate: false,
        }
    }
}

type Slot = Arc<OnceCell<Arc<dyn PlatformChecker>>>;

pub struct CheckerRegistry {
    plugins: Vec<Arc<dyn CheckerPlugin>>,
    built: DashMap<String, Slot>,
    calibration: CalibrationPolicy,
}

impl Default for CheckerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckerRegistry {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            built: DashMap::new(),
            calibration: CalibrationPolicy::default(),
        }
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn CheckerPlugin>) -> Self {
        self.register(plugin);
        self
    }

    pub fn with_calibration(mut self, calibration: CalibrationPolicy) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn register(&mut self, plugin: Arc<dyn CheckerPlugin>) {
        debug!("Registered checker plugin {}", plugin.name());
        self.plugins.push(plugin);
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Number of platforms with a built checker
    pub fn built_count(&self) -> usize {
        self.built.iter().filter(|slot| slot.value().initialized()).count()
    }

    /// The checker for `platform`, building it on first use
    pub async fn checker_for(
        &self,
        platform: &Platform,
        fetcher: &Arc<Fetcher>,
    ) -> Result<Arc<dyn PlatformChecker>, CheckerError> {
        let slot = self
            .built
            .entry(platform.name.to_lowercase())
            .or_default()
            .clone();

        slot.get_or_try_init(|| self.build(Arc::new(platform.clone()), fetcher.clone()))
            .await
            .cloned()
    }

    async fn build(
        &self,
        platform: Arc<Platform>,
        fetcher: Arc<Fetcher>,
    ) -> Result<Arc<dyn PlatformChecker>, CheckerError> {
        if let Some(plugin) = self.plugins.iter().find(|p| p.supports(&platform)) {
            debug!("Plugin {} handles {}", plugin.name(), platform.name);
            return plugin.build(platform, fetcher).await;
        }

        let sentinel = match (&platform.sentinel, self.calibration) {
            (_, CalibrationPolicy { enabled: false, .. }) => None,
            (Some(sentinel), _) => Some(sentinel.clone()),
            (None, CalibrationPolicy { generate: true, .. }) => Some(generated_sentinel()),
            (None, _) => None,
        };

        let checker: Arc<dyn PlatformChecker> = match (platform.detection, sentinel) {
            (DetectionMethod::StatusCode, Some(sentinel)) => {
                Arc::new(StatusCodeChecker::calibrated(platform, fetcher, &sentinel).await?)
            }
            (DetectionMethod::StatusCode, None) => Arc::new(StatusCodeChecker::new(platform, fetcher)?),
            (DetectionMethod::Pattern, Some(sentinel)) => {
                Arc::new(PatternChecker::calibrated(platform, fetcher, &sentinel).await?)
            }
            (DetectionMethod::Pattern, None) => Arc::new(PatternChecker::new(platform, fetcher)?),
        };

        if !checker.is_reliable() {
            warn!("Checker for {} is unreliable", checker.platform().name);
        }
        Ok(checker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound_core::{IdentifierKind, ProbeRequest, ProfileResult};
    use hound_net::mock::{ScriptedReply, ScriptedTransport};
    use hound_net::{HttpConfig, RateLimitConfig};

    struct FixedChecker {
        platform: Platform,
    }

    #[async_trait]
    impl PlatformChecker for FixedChecker {
        fn platform(&self) -> &Platform {
            &self.platform
        }

        async fn check(&self, identifier: &str, kind: IdentifierKind) -> ProfileResult {
            let request = ProbeRequest::new(&self.platform, identifier, kind);
            ProfileResult::found(&request, "api://fixed")
        }
    }

    struct ApiPlugin;

    #[async_trait]
    impl CheckerPlugin for ApiPlugin {
        fn name(&self) -> &str {
            "api"
        }

        fn supports(&self, platform: &Platform) -> bool {
            platform.url.starts_with("api://")
        }

        async fn build(
            &self,
            platform: Arc<Platform>,
            _fetcher: Arc<Fetcher>,
        ) -> Result<Arc<dyn PlatformChecker>, CheckerError> {
            Ok(Arc::new(FixedChecker {
                platform: (*platform).clone(),
            }))
        }
    }

    fn fetcher() -> (Arc<Fetcher>, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new());
        let fetcher = Arc::new(Fetcher::new(
            transport.clone(),
            &HttpConfig::default(),
            RateLimitConfig::default(),
        ));
        (fetcher, transport)
    }

    #[tokio::test]
    async fn test_plugin_consulted_first() {
        let registry = CheckerRegistry::new().with_plugin(Arc::new(ApiPlugin));
        let (fetcher, transport) = fetcher();
        let platform = Platform::new("Api", "api://{username}");

        let checker = registry.checker_for(&platform, &fetcher).await.unwrap();
        let result = checker.check("alice", IdentifierKind::Username).await;
        assert_eq!(result.url, "api://fixed");
        assert_eq!(transport.total_calls(), 0);
        assert_eq!(registry.plugin_names(), vec!["api"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_runs_once() {
        let registry = CheckerRegistry::new();
        let (fetcher, transport) = fetcher();
        transport.set_fallback(ScriptedReply::status(200, "welcome"));
        let platform =
            Platform::new("Catchall", "https://catchall.test/{username}").with_sentinel("zz-none");

        let first = registry.checker_for(&platform, &fetcher).await.unwrap();
        let second = registry.checker_for(&platform, &fetcher).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!first.is_reliable());
        assert_eq!(transport.calls("https://catchall.test/zz-none"), 1);
        assert_eq!(registry.built_count(), 1);
    }

    #[tokio::test]
    async fn test_calibration_disabled() {
        let registry = CheckerRegistry::new().with_calibration(CalibrationPolicy {
            enabled: false,
            generate: false,
        });
        let (fetcher, transport) = fetcher();
        let platform = Platform::new("Site", "https://site.test/{username}").with_sentinel("zz-none");

        let checker = registry.checker_for(&platform, &fetcher).await.unwrap();
        assert!(checker.is_reliable());
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_build_error_not_cached_as_success() {
        let registry = CheckerRegistry::new();
        let (fetcher, _) = fetcher();
        let platform = Platform::new("Bad", "https://bad.test/{username}").with_patterns(Some("(oops"), None);

        assert!(registry.checker_for(&platform, &fetcher).await.is_err());
        assert_eq!(registry.built_count(), 0);
    }
}
