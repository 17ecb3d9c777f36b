//! Scatter-gather probe engine
//!
//! One batch fans an identifier out to every selected platform. Cache hits are
//! answered without running a checker; misses run under a process-wide semaphore
//! so that concurrent batches share one concurrency cap. The batch deadline
//! drops whatever is still in flight and reports it as timed out.

use anyhow::Context;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hound_core::{
    BatchCounts, BatchSummary, EventSink, IdentifierKind, IndeterminateReason, Platform,
    PlatformFilter, PlatformRegistry, ProbeEvent, ProbeRequest, ProfileResult, TracingSink,
};
use hound_net::{Fetcher, ReqwestTransport};
use hound_probe::{
    CacheConfig, CacheLookup, CheckerRegistry, DiskStore, MemoryStore, TieredCache,
};

use crate::{EngineConfig, OrchestratorConfig};

/// One identifier to probe, and how
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub identifier: String,
    /// Detected from the identifier when unset
    pub kind: Option<IdentifierKind>,
    pub filter: PlatformFilter,
    /// Also return indeterminate outcomes
    pub exhaustive: bool,
    /// Overrides the configured batch timeout
    pub timeout: Option<Duration>,
}

impl BatchRequest {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            kind: None,
            filter: PlatformFilter::default(),
            exhaustive: false,
            timeout: None,
        }
    }

    pub fn with_kind(mut self, kind: IdentifierKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_filter(mut self, filter: PlatformFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn exhaustive(mut self, exhaustive: bool) -> Self {
        self.exhaustive = exhaustive;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What a batch returns
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Normalized identifier
    pub identifier: String,
    pub kind: IdentifierKind,
    /// Keyed by platform name: found profiles, plus indeterminates in exhaustive mode
    pub results: BTreeMap<String, ProfileResult>,
    /// Every platform that gave no conclusive answer, and why
    pub unresolved: BTreeMap<String, IndeterminateReason>,
    pub summary: BatchSummary,
}

impl BatchReport {
    pub fn found(&self) -> impl Iterator<Item = &ProfileResult> {
        self.results.values().filter(|r| r.exists)
    }

    /// "platform X: no result (reason)" lines
    pub fn failures(&self) -> Vec<String> {
        self.unresolved
            .iter()
            .map(|(platform, reason)| format!("{}: no result ({})", platform, reason))
            .collect()
    }
}

/// Per-batch accumulator
struct Gathered {
    exhaustive: bool,
    counts: BatchCounts,
    results: BTreeMap<String, ProfileResult>,
    unresolved: BTreeMap<String, IndeterminateReason>,
}

struct ProbeOutcome {
    platform: String,
    lookup: CacheLookup,
}

pub struct Orchestrator {
    registry: Arc<PlatformRegistry>,
    fetcher: Arc<Fetcher>,
    cache: TieredCache,
    checkers: Arc<CheckerRegistry>,
    sink: Arc<dyn EventSink>,
    permits: Arc<Semaphore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<PlatformRegistry>,
        fetcher: Arc<Fetcher>,
        cache: TieredCache,
        config: OrchestratorConfig,
    ) -> Self {
        let checkers = CheckerRegistry::new().with_calibration(config.calibration());
        Self {
            registry,
            fetcher,
            cache,
            checkers: Arc::new(checkers),
            sink: Arc::new(TracingSink),
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
        }
    }

    /// Production wiring: reqwest transport and a disk or in-memory L2
    pub fn from_config(config: &EngineConfig, registry: PlatformRegistry) -> anyhow::Result<Self> {
        config.validate()?;

        let transport =
            ReqwestTransport::new(&config.http).context("Failed to create HTTP transport")?;
        let fetcher = Arc::new(Fetcher::new(
            Arc::new(transport),
            &config.http,
            config.rate_limit,
        ));
        let cache = build_cache(&config.cache)?;

        info!(
            "Engine ready: {} platforms, concurrency {}",
            registry.len(),
            config.orchestrator.concurrency
        );
        Ok(Self::new(
            Arc::new(registry),
            fetcher,
            cache,
            config.orchestrator.clone(),
        ))
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_checkers(mut self, checkers: CheckerRegistry) -> Self {
        self.checkers = Arc::new(checkers);
        self
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Probe one identifier across every selected platform
    ///
    /// Never fails. Per-platform problems land in `unresolved`, and a deadline
    /// keeps everything that completed before it.
    pub async fn run(&self, request: BatchRequest) -> BatchReport {
        let started = Instant::now();
        let batch_id = Uuid::new_v4();
        let kind = request
            .kind
            .unwrap_or_else(|| IdentifierKind::detect(&request.identifier));
        let identifier = kind.normalize(&request.identifier);
        let timeout = request.timeout.unwrap_or_else(|| self.config.batch_timeout());
        let deadline = tokio::time::Instant::now() + timeout;

        let platforms: Vec<&Platform> = self.registry.select(kind, &request.filter).collect();
        info!(
            "Batch {}: probing {} platforms for {} ({})",
            batch_id,
            platforms.len(),
            identifier,
            kind
        );

        let mut pending: BTreeMap<String, ProbeRequest> = platforms
            .iter()
            .map(|p| (p.name.clone(), ProbeRequest::new(p, &identifier, kind)))
            .collect();
        let mut tasks: FuturesUnordered<_> = platforms
            .iter()
            .map(|p| self.probe(batch_id, p, &identifier, kind))
            .collect();

        let mut gathered = Gathered {
            exhaustive: request.exhaustive,
            counts: BatchCounts {
                selected: platforms.len(),
                ..BatchCounts::default()
            },
            results: BTreeMap::new(),
            unresolved: BTreeMap::new(),
        };
        let mut deadline_hit = false;

        loop {
            match tokio::time::timeout_at(deadline, tasks.next()).await {
                Ok(Some(outcome)) => {
                    pending.remove(&outcome.platform);
                    if outcome.lookup.is_cached() {
                        gathered.counts.cached += 1;
                    } else {
                        gathered.counts.checked += 1;
                    }
                    self.collect(batch_id, &mut gathered, outcome.platform, outcome.lookup.result);
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    break;
                }
            }
        }
        // Dropping the set cancels every probe still in flight
        drop(tasks);

        if deadline_hit {
            warn!(
                "Batch {} hit its {:?} deadline with {} probes pending",
                batch_id,
                timeout,
                pending.len()
            );
            for (platform, probe) in pending {
                let url = self
                    .registry
                    .get(&platform)
                    .map(|p| p.build_url(&identifier, kind))
                    .unwrap_or_default();
                let result =
                    ProfileResult::indeterminate(&probe, &url, IndeterminateReason::Timeout);
                self.collect(batch_id, &mut gathered, platform, result);
            }
        }

        let Gathered {
            counts,
            results,
            unresolved,
            ..
        } = gathered;
        self.sink.publish(ProbeEvent::ProbeComplete { batch_id, counts });
        let duration = started.elapsed();
        info!(
            "Batch {} done in {:?}: {} selected, {} checked, {} cached, {} found, {} errored",
            batch_id,
            duration,
            counts.selected,
            counts.checked,
            counts.cached,
            counts.found,
            counts.errored
        );

        BatchReport {
            identifier: identifier.clone(),
            kind,
            results,
            unresolved,
            summary: BatchSummary {
                batch_id,
                identifier,
                counts,
                duration,
                deadline_hit,
            },
        }
    }

    fn collect(&self, batch_id: Uuid, gathered: &mut Gathered, platform: String, result: ProfileResult) {
        if result.exists {
            gathered.counts.found += 1;
            self.sink.publish(ProbeEvent::ProbeFound {
                batch_id,
                profile: result.clone(),
            });
            gathered.results.insert(platform, result);
            return;
        }

        let Some(reason) = result.indeterminate.clone() else {
            return;
        };
        if reason.is_error() {
            gathered.counts.errored += 1;
        }
        if reason == IndeterminateReason::Timeout {
            gathered.counts.timed_out += 1;
        }
        debug!("{}", result.describe());
        gathered.unresolved.insert(platform.clone(), reason);
        if gathered.exhaustive {
            gathered.results.insert(platform, result);
        }
    }

    async fn probe(
        &self,
        batch_id: Uuid,
        platform: &Platform,
        identifier: &str,
        kind: IdentifierKind,
    ) -> ProbeOutcome {
        let request = ProbeRequest::new(platform, identifier, kind);

        let fetch = {
            let platform = platform.clone();
            let identifier = identifier.to_string();
            let fetcher = Arc::clone(&self.fetcher);
            let checkers = Arc::clone(&self.checkers);
            let sink = Arc::clone(&self.sink);
            let permits = Arc::clone(&self.permits);

            move || async move {
                // The semaphore is never closed; a missing permit would only mean running uncapped
                let _permit = permits.acquire_owned().await.ok();
                sink.publish(ProbeEvent::ProbeStarted {
                    batch_id,
                    platform: platform.name.clone(),
                    identifier: identifier.clone(),
                });

                match checkers.checker_for(&platform, &fetcher).await {
                    Ok(checker) => checker.check(&identifier, kind).await,
                    Err(e) => {
                        warn!("No checker for {}: {}", platform.name, e);
                        let request = ProbeRequest::new(&platform, &identifier, kind);
                        ProfileResult::indeterminate(
                            &request,
                            &platform.build_url(&identifier, kind),
                            IndeterminateReason::Fatal {
                                message: e.to_string(),
                            },
                        )
                    }
                }
            }
        };

        let lookup = self.cache.get_or_fetch(&request, fetch).await;
        ProbeOutcome {
            platform: platform.name.clone(),
            lookup,
        }
    }
}

/// The tiered cache described by `config`
pub fn build_cache(config: &CacheConfig) -> anyhow::Result<TieredCache> {
    if !config.enabled {
        debug!("Result cache disabled");
        return Ok(TieredCache::disabled());
    }

    match &config.dir {
        Some(dir) => {
            let store = DiskStore::open(dir)
                .with_context(|| format!("Failed to open cache directory {}", dir.display()))?;
            info!("Persistent cache at {}", dir.display());
            Ok(TieredCache::new(config.clone(), Some(Arc::new(store))))
        }
        None => Ok(TieredCache::new(
            config.clone(),
            Some(Arc::new(MemoryStore::new())),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound_core::{ChannelSink, Confidence, NullSink, PlatformCategory};
    use hound_net::mock::ScriptedTransport;
    use hound_net::{HttpConfig, RateLimitConfig, TransportError};

    fn engine(platforms: Vec<Platform>) -> (Orchestrator, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new());
        let fetcher = Arc::new(Fetcher::new(
            transport.clone(),
            &HttpConfig::default(),
            RateLimitConfig::default(),
        ));
        let registry = Arc::new(PlatformRegistry::from_platforms(platforms).unwrap());
        let orchestrator = Orchestrator::new(
            registry,
            fetcher,
            TieredCache::memory_only(CacheConfig::default()),
            OrchestratorConfig::default(),
        )
        .with_sink(Arc::new(NullSink));
        (orchestrator, transport)
    }

    fn site(name: &str) -> Platform {
        Platform::new(name, &format!("https://{}.test/{{username}}", name.to_lowercase()))
    }

    #[tokio::test]
    async fn test_found_and_absent() {
        let (engine, transport) = engine(vec![site("Alpha"), site("Beta")]);
        transport.respond("https://alpha.test/alice123", 200, "<title>alice123</title>");
        transport.respond("https://beta.test/alice123", 404, "");

        let report = engine.run(BatchRequest::new("alice123")).await;

        assert_eq!(report.kind, IdentifierKind::Username);
        assert_eq!(report.results.len(), 1);
        let alpha = &report.results["Alpha"];
        assert!(alpha.exists);
        assert_eq!(alpha.url, "https://alpha.test/alice123");
        assert!(report.unresolved.is_empty());

        let counts = report.summary.counts;
        assert_eq!(counts.selected, 2);
        assert_eq!(counts.checked, 2);
        assert_eq!(counts.found, 1);
        assert_eq!(counts.errored, 0);
        assert!(!report.summary.deadline_hit);
    }

    #[tokio::test]
    async fn test_catchall_platform_kept_low_confidence() {
        let (engine, transport) =
            engine(vec![site("Catchall").with_sentinel("zz-nobody-here")]);
        transport.respond("https://catchall.test/zz-nobody-here", 200, "profile page");
        transport.respond("https://catchall.test/alice123", 200, "profile page");

        let report = engine.run(BatchRequest::new("alice123")).await;

        let result = &report.results["Catchall"];
        assert!(result.exists);
        assert!(result.unreliable);
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_keeps_completed_results() {
        let (engine, transport) = engine(vec![site("Fast"), site("Slow")]);
        transport.respond("https://fast.test/alice123", 200, "hello alice123");
        transport.respond("https://slow.test/alice123", 200, "hello alice123");
        transport.delay("https://slow.test/alice123", Duration::from_secs(5));

        let request = BatchRequest::new("alice123").with_timeout(Duration::from_secs(1));
        let report = engine.run(request.clone()).await;

        assert!(report.summary.deadline_hit);
        assert!(report.results["Fast"].exists);
        assert!(!report.results.contains_key("Slow"));
        assert_eq!(report.unresolved["Slow"], IndeterminateReason::Timeout);
        assert_eq!(report.summary.counts.timed_out, 1);
        assert_eq!(report.summary.counts.found, 1);

        // The cancelled probe wrote nothing
        let slow = ProbeRequest::new(
            engine.registry().get("Slow").unwrap(),
            "alice123",
            IdentifierKind::Username,
        );
        assert!(engine.cache().get(&slow).await.is_none());

        let report = engine.run(request.exhaustive(true)).await;
        let slow = &report.results["Slow"];
        assert!(!slow.exists);
        assert_eq!(slow.indeterminate, Some(IndeterminateReason::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_batches_share_one_fetch() {
        let (engine, transport) = engine(vec![site("Alpha")]);
        transport.respond("https://alpha.test/alice123", 200, "hello alice123");
        transport.delay("https://alpha.test/alice123", Duration::from_millis(200));

        let (first, second) = tokio::join!(
            engine.run(BatchRequest::new("alice123")),
            engine.run(BatchRequest::new("alice123")),
        );

        assert_eq!(transport.calls("https://alpha.test/alice123"), 1);
        assert_eq!(first.results["Alpha"], second.results["Alpha"]);
        let cached = first.summary.counts.cached + second.summary.counts.cached;
        assert_eq!(cached, 1);
    }

    #[tokio::test]
    async fn test_second_batch_served_from_cache() {
        let (engine, transport) = engine(vec![site("Alpha"), site("Beta")]);
        transport.respond("https://alpha.test/alice123", 200, "hello alice123");

        engine.run(BatchRequest::new("alice123")).await;
        let report = engine.run(BatchRequest::new("alice123")).await;

        assert_eq!(transport.total_calls(), 2);
        assert_eq!(report.summary.counts.cached, 2);
        assert_eq!(report.summary.counts.checked, 0);
        assert!(report.results["Alpha"].exists);
        assert!(!report.results.contains_key("Beta"));
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let (engine, transport) = engine(vec![site("Alpha"), site("Beta")]);
        transport.respond("https://alpha.test/alice123", 200, "hello alice123");
        let (sink, mut rx) = ChannelSink::new();
        let engine = engine.with_sink(Arc::new(sink));

        let report = engine.run(BatchRequest::new("alice123")).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
        assert_eq!(names.iter().filter(|n| **n == "probe_started").count(), 2);
        assert_eq!(names.iter().filter(|n| **n == "probe_found").count(), 1);
        assert_eq!(names.last(), Some(&"probe_complete"));
        assert!(events.iter().all(|e| e.batch_id() == report.summary.batch_id));
        match events.last() {
            Some(ProbeEvent::ProbeComplete { counts, .. }) => assert_eq!(counts.found, 1),
            other => panic!("unexpected last event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_filter_selects_platforms() {
        let (engine, transport) = engine(vec![
            site("Alpha").with_category(PlatformCategory::Gaming),
            site("Beta").with_category(PlatformCategory::SocialMedia),
            site("Gamma").with_nsfw(true),
        ]);
        transport.set_fallback(hound_net::mock::ScriptedReply::status(200, "hello alice123"));

        let filter = PlatformFilter::new().exclude_nsfw(true);
        let report = engine.run(BatchRequest::new("alice123").with_filter(filter)).await;
        assert_eq!(report.summary.counts.selected, 2);
        assert!(!report.results.contains_key("Gamma"));

        let filter = PlatformFilter::new().with_categories([PlatformCategory::Gaming]);
        let report = engine.run(BatchRequest::new("alice123").with_filter(filter)).await;
        assert_eq!(report.results.keys().collect::<Vec<_>>(), vec!["Alpha"]);

        let filter = PlatformFilter::new().with_names(["beta"]);
        let report = engine.run(BatchRequest::new("alice123").with_filter(filter)).await;
        assert_eq!(report.results.keys().collect::<Vec<_>>(), vec!["Beta"]);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let (engine, transport) = engine(vec![
            site("Alpha"),
            site("Broken"),
            site("Pattern").with_patterns(Some("(unclosed"), None),
        ]);
        transport.respond("https://alpha.test/alice123", 200, "hello alice123");
        transport.fail(
            "https://broken.test/alice123",
            TransportError::Dns("no such host".to_string()),
        );

        let report = engine.run(BatchRequest::new("alice123")).await;

        assert!(report.results["Alpha"].exists);
        assert!(matches!(
            report.unresolved["Broken"],
            IndeterminateReason::Fatal { .. }
        ));
        assert!(matches!(
            report.unresolved["Pattern"],
            IndeterminateReason::Fatal { .. }
        ));
        assert_eq!(report.summary.counts.errored, 2);
        assert_eq!(report.failures().len(), 2);
        assert!(report.failures()[0].starts_with("Broken: no result ("));
    }

    #[tokio::test]
    async fn test_email_uses_email_template() {
        let mut platform = site("Mail").with_kinds(&[IdentifierKind::Email]);
        platform.email_url = Some("https://mail.test/lookup?email={email}".to_string());
        let (engine, transport) = engine(vec![platform, site("Usernames")]);
        transport.respond("https://mail.test/lookup?email=alice%40example.com", 200, "alice@example.com");

        let report = engine.run(BatchRequest::new("  Alice@Example.com ")).await;

        assert_eq!(report.kind, IdentifierKind::Email);
        assert_eq!(report.identifier, "alice@example.com");
        assert_eq!(report.summary.counts.selected, 1);
        assert!(report.results["Mail"].exists);
    }

    #[test]
    fn test_build_cache_variants() {
        let disabled = build_cache(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        })
        .unwrap();
        assert!(!disabled.config().enabled);

        let dir = tempfile::tempdir().unwrap();
        let disk = build_cache(&CacheConfig {
            dir: Some(dir.path().join("l2")),
            ..CacheConfig::default()
        })
        .unwrap();
        assert!(disk.config().enabled);
        assert!(dir.path().join("l2").is_dir());
    }
}
