//! Multi-identifier investigations
//!
//! Probes each identifier in turn through the orchestrator, pools every found
//! profile and runs the analysis stage over the pool.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use hound_analysis::{
    ActivityProfile, AnalysisConfig, Cluster, CorrelationAnalyzer, CorrelationScore,
    GraphStatistics, Pattern, RelationshipGraph, SharedValue, TemporalPattern, TimelineAnalyzer,
    TimelineEvent,
};
use hound_core::{BatchSummary, Confidence, IdentifierKind, PlatformFilter, ProfileResult};

use crate::{BatchRequest, Orchestrator};

/// Found profiles for one identifier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentifierAggregate {
    pub identifier: String,
    pub kind: IdentifierKind,
    pub platforms: Vec<String>,
    /// Platform -> profile URL
    pub urls: BTreeMap<String, String>,
    /// Platform -> probe latency
    pub latencies_ms: BTreeMap<String, u64>,
    pub average_latency_ms: f64,
    /// Platforms whose positive is low-confidence
    pub low_confidence: Vec<String>,
}

impl IdentifierAggregate {
    fn from_profiles(identifier: &str, kind: IdentifierKind, profiles: &[ProfileResult]) -> Self {
        let mine: Vec<&ProfileResult> = profiles
            .iter()
            .filter(|p| p.exists && p.identifier == identifier)
            .collect();

        let latencies_ms: BTreeMap<String, u64> = mine
            .iter()
            .map(|p| (p.platform.clone(), p.latency_ms))
            .collect();
        let average_latency_ms = if latencies_ms.is_empty() {
            0.0
        } else {
            latencies_ms.values().sum::<u64>() as f64 / latencies_ms.len() as f64
        };

        Self {
            identifier: identifier.to_string(),
            kind,
            platforms: mine.iter().map(|p| p.platform.clone()).collect(),
            urls: mine.iter().map(|p| (p.platform.clone(), p.url.clone())).collect(),
            latencies_ms,
            average_latency_ms,
            low_confidence: mine
                .iter()
                .filter(|p| p.confidence == Confidence::Low)
                .map(|p| p.platform.clone())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvestigationReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub identifiers: Vec<String>,
    pub batches: Vec<BatchSummary>,
    /// Every found profile across all identifiers
    pub profiles: Vec<ProfileResult>,
    pub aggregates: Vec<IdentifierAggregate>,
    pub correlations: Vec<CorrelationScore>,
    pub patterns: Vec<Pattern>,
    pub shared_attributes: Vec<SharedValue>,
    pub graph: RelationshipGraph,
    pub clusters: Vec<Cluster>,
    pub graph_statistics: GraphStatistics,
    pub timeline: Vec<TimelineEvent>,
    pub temporal_patterns: Vec<TemporalPattern>,
    pub activity: Option<ActivityProfile>,
    /// Identifier -> "platform X: no result (reason)" lines
    pub failures: BTreeMap<String, Vec<String>>,
}

impl InvestigationReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for InvestigationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Investigation {}", self.id)?;
        writeln!(f, "Started: {}", self.started_at.to_rfc3339())?;
        writeln!(f, "Identifiers: {}", self.identifiers.join(", "))?;
        writeln!(f, "Profiles found: {}", self.profiles.len())?;

        for aggregate in &self.aggregates {
            writeln!(f)?;
            writeln!(
                f,
                "== {} ({}): {} platforms ==",
                aggregate.identifier,
                aggregate.kind,
                aggregate.platforms.len()
            )?;
            for (platform, url) in &aggregate.urls {
                let latency = aggregate.latencies_ms.get(platform).copied().unwrap_or(0);
                let flag = if aggregate.low_confidence.contains(platform) {
                    " [low confidence]"
                } else {
                    ""
                };
                writeln!(f, "  {:<20} {} ({} ms){}", platform, url, latency, flag)?;
            }
        }

        if !self.correlations.is_empty() {
            writeln!(f)?;
            writeln!(f, "== Correlations ==")?;
            for score in &self.correlations {
                let fields: Vec<&str> = score
                    .shared_attributes
                    .iter()
                    .map(|a| a.field.as_str())
                    .collect();
                writeln!(
                    f,
                    "  {} <-> {}: score {:.2}, confidence {:.2} [{}]",
                    score.a,
                    score.b,
                    score.score,
                    score.confidence,
                    fields.join(", ")
                )?;
            }
        }

        if !self.patterns.is_empty() {
            writeln!(f)?;
            writeln!(f, "== Patterns ==")?;
            for pattern in &self.patterns {
                writeln!(f, "  {} (confidence {:.2})", pattern.description, pattern.confidence)?;
            }
        }

        writeln!(f)?;
        writeln!(
            f,
            "== Graph: {} nodes, {} edges, {} clusters ==",
            self.graph_statistics.node_count,
            self.graph_statistics.edge_count,
            self.graph_statistics.clusters
        )?;
        for (i, cluster) in self.clusters.iter().enumerate() {
            if cluster.hubs.is_empty() {
                writeln!(f, "  #{}: {} nodes", i + 1, cluster.nodes.len())?;
            } else {
                writeln!(
                    f,
                    "  #{}: {} nodes, hubs: {}",
                    i + 1,
                    cluster.nodes.len(),
                    cluster.hubs.join(", ")
                )?;
            }
        }

        if !self.timeline.is_empty() {
            writeln!(f)?;
            writeln!(f, "== Timeline: {} events ==", self.timeline.len())?;
            for event in &self.timeline {
                writeln!(f, "  {} {}", event.timestamp.format("%Y-%m-%d"), event.title)?;
            }
            for pattern in &self.temporal_patterns {
                writeln!(f, "  * {} (confidence {:.2})", pattern.description, pattern.confidence)?;
            }
        }

        let failures: usize = self.failures.values().map(Vec::len).sum();
        if failures > 0 {
            writeln!(f)?;
            writeln!(f, "== No result ({}) ==", failures)?;
            for (identifier, lines) in &self.failures {
                for line in lines {
                    writeln!(f, "  [{}] {}", identifier, line)?;
                }
            }
        }
        Ok(())
    }
}

/// Several identifiers, one analysis
pub struct Investigation {
    engine: Arc<Orchestrator>,
    analysis: AnalysisConfig,
    kind: Option<IdentifierKind>,
    filter: PlatformFilter,
    timeout: Option<Duration>,
}

impl Investigation {
    pub fn new(engine: Arc<Orchestrator>, analysis: AnalysisConfig) -> Self {
        Self {
            engine,
            analysis,
            kind: None,
            filter: PlatformFilter::default(),
            timeout: None,
        }
    }

    /// Force one kind for every identifier instead of detecting it
    pub fn with_kind(mut self, kind: Option<IdentifierKind>) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_filter(mut self, filter: PlatformFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run<I, S>(&self, identifiers: I) -> InvestigationReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = Uuid::new_v4();
        let started_at = Utc::now();

        let mut seen = Vec::new();
        let mut batches = Vec::new();
        let mut profiles: Vec<ProfileResult> = Vec::new();
        let mut aggregates = Vec::new();
        let mut failures = BTreeMap::new();

        for raw in identifiers {
            let mut request = BatchRequest::new(raw).with_filter(self.filter.clone());
            if let Some(kind) = self.kind {
                request = request.with_kind(kind);
            }
            if let Some(timeout) = self.timeout {
                request = request.with_timeout(timeout);
            }

            let kind = request
                .kind
                .unwrap_or_else(|| IdentifierKind::detect(&request.identifier));
            if seen.contains(&kind.normalize(&request.identifier)) {
                continue;
            }

            let report = self.engine.run(request).await;
            seen.push(report.identifier.clone());

            profiles.extend(report.found().cloned());
            aggregates.push(IdentifierAggregate::from_profiles(
                &report.identifier,
                report.kind,
                &profiles,
            ));
            let lines = report.failures();
            if !lines.is_empty() {
                failures.insert(report.identifier.clone(), lines);
            }
            batches.push(report.summary);
        }

        info!(
            "Investigation {}: {} profiles across {} identifiers",
            id,
            profiles.len(),
            seen.len()
        );

        let analyzer = CorrelationAnalyzer::new(self.analysis.correlation.clone());
        let correlations = analyzer.correlate(&profiles);
        let patterns = analyzer.detect_patterns(&profiles);
        let shared_attributes = analyzer.find_shared_attributes(&profiles);

        let graph =
            RelationshipGraph::build_from_profiles(&profiles, &analyzer, self.analysis.graph_threshold);
        let clusters = graph.find_clusters();
        let graph_statistics = graph.statistics();

        let mut timeline = TimelineAnalyzer::new(self.analysis.timeline.clone());
        timeline.build_from_profiles(&profiles);
        let temporal_patterns = timeline.find_temporal_patterns();

        InvestigationReport {
            id,
            started_at,
            identifiers: seen,
            batches,
            aggregates,
            correlations,
            patterns,
            shared_attributes,
            clusters,
            graph_statistics,
            graph,
            activity: timeline.activity_profile(),
            timeline: timeline.events().to_vec(),
            temporal_patterns,
            profiles,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OrchestratorConfig;
    use hound_core::{NullSink, Platform, PlatformRegistry};
    use hound_net::mock::ScriptedTransport;
    use hound_net::{Fetcher, HttpConfig, RateLimitConfig};
    use hound_probe::{CacheConfig, TieredCache};
    use std::collections::BTreeSet;

    fn page(name: &str, joined: &str) -> String {
        format!(
            r#"<html><head><meta property="og:title" content="{}"></head>
            <body>Joined {}</body></html>"#,
            name, joined
        )
    }

    fn investigation() -> (Investigation, Arc<ScriptedTransport>) {
        let mut alpha = Platform::new("Alpha", "https://alpha.test/{username}");
        alpha
            .metadata
            .insert("joined".to_string(), r"Joined (\d{4}-\d{2}-\d{2})".to_string());
        let beta = Platform::new("Beta", "https://beta.test/{username}");
        let gamma = Platform::new("Gamma", "https://gamma.test/{username}");

        let transport = Arc::new(ScriptedTransport::new());
        let fetcher = Arc::new(Fetcher::new(
            transport.clone(),
            &HttpConfig::default(),
            RateLimitConfig::default(),
        ));
        let registry = PlatformRegistry::from_platforms(vec![alpha, beta, gamma]).unwrap();
        let engine = Orchestrator::new(
            Arc::new(registry),
            fetcher,
            TieredCache::memory_only(CacheConfig::default()),
            OrchestratorConfig::default(),
        )
        .with_sink(Arc::new(NullSink));

        (
            Investigation::new(Arc::new(engine), AnalysisConfig::default()),
            transport,
        )
    }

    #[tokio::test]
    async fn test_investigation_pools_profiles() {
        let (investigation, transport) = investigation();
        transport.respond("https://alpha.test/alice123", 200, &page("Alice Smith", "2020-01-05"));
        transport.respond("https://beta.test/alice123", 200, &page("Alice Smith", "2020-02-01"));
        transport.respond("https://alpha.test/alice_123", 200, &page("Alice Smith", "2021-06-30"));

        let report = investigation.run(["alice123", "alice_123"]).await;

        assert_eq!(report.identifiers, vec!["alice123", "alice_123"]);
        assert_eq!(report.batches.len(), 2);
        assert_eq!(report.profiles.len(), 3);
        assert!(report.profiles.iter().all(|p| p.exists));

        let first = &report.aggregates[0];
        assert_eq!(first.identifier, "alice123");
        assert_eq!(first.platforms, vec!["Alpha", "Beta"]);
        assert_eq!(first.urls["Beta"], "https://beta.test/alice123");
        assert_eq!(report.aggregates[1].platforms, vec!["Alpha"]);

        // Correlations come back best first
        assert!(!report.correlations.is_empty());
        assert!(report
            .correlations
            .windows(2)
            .all(|w| w[0].score >= w[1].score));
        assert!(report
            .shared_attributes
            .iter()
            .any(|s| s.field == "display_name" && s.profiles.len() == 3));

        // Clusters partition the graph
        let mut covered = BTreeSet::new();
        for cluster in &report.clusters {
            for node in &cluster.nodes {
                assert!(covered.insert(node.clone()));
            }
        }
        assert_eq!(covered.len(), report.graph.node_count());

        // Only Alpha pages carry a join date
        assert_eq!(report.timeline.len(), 2);
        assert!(report.timeline[0].timestamp < report.timeline[1].timestamp);
        assert!(report.activity.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_identifiers_probed_once() {
        let (investigation, transport) = investigation();
        transport.respond("https://alpha.test/alice123", 200, &page("Alice", "2020-01-05"));

        let report = investigation.run(["alice123", " alice123 "]).await;

        assert_eq!(report.identifiers, vec!["alice123"]);
        assert_eq!(report.batches.len(), 1);
        assert_eq!(transport.calls("https://alpha.test/alice123"), 1);
    }

    #[tokio::test]
    async fn test_text_report_mentions_findings() {
        let (investigation, transport) = investigation();
        transport.respond("https://alpha.test/alice123", 200, &page("Alice", "2020-01-05"));
        transport.fail(
            "https://gamma.test/alice123",
            hound_net::TransportError::Tls("bad certificate".to_string()),
        );

        let report = investigation.run(["alice123"]).await;
        let text = report.to_text();

        assert!(text.contains("Identifiers: alice123"));
        assert!(text.contains("https://alpha.test/alice123"));
        assert!(text.contains("Gamma: no result ("));
        assert_eq!(report.failures["alice123"].len(), 1);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["profiles"].as_array().map(Vec::len), Some(1));
    }
}
