//! Timeline of dated profile events
//!
//! Events stay sorted by timestamp; events sharing a timestamp keep their
//! insertion order. Every pattern found here is a heuristic and carries a
//! confidence and the events supporting it.

use chrono::{DateTime, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use hound_core::ProfileResult;

/// Metadata keys read as profile creation dates
const CREATED_KEYS: &[&str] = &["created_at", "joined"];

/// Metadata keys read as last-activity dates
const ACTIVITY_KEYS: &[&str] = &["last_active", "last_activity"];

pub const EVENT_PROFILE_CREATED: &str = "profile_created";
pub const EVENT_LAST_ACTIVITY: &str = "last_activity";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Gaps longer than this are reported
    pub gap_threshold_days: i64,
    pub cluster_window_hours: i64,
    /// Events needed inside one window to make a cluster
    pub cluster_min_events: usize,
    /// Repeats of one interval needed to suggest periodicity
    pub periodicity_min_repeats: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            gap_threshold_days: 30,
            cluster_window_hours: 24,
            cluster_min_events: 3,
            periodicity_min_repeats: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    /// Platform the event came from
    pub source: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalPatternKind {
    ActivityGap,
    TemporalCluster,
    Periodicity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalPattern {
    pub kind: TemporalPatternKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub confidence: f64,
    /// Ids of the supporting events
    pub evidence: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityProfile {
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
    pub span_days: i64,
    pub total_events: usize,
    /// UTC hour with the most events, earliest hour on ties
    pub peak_hour: u32,
    pub hourly: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineStatistics {
    pub total_events: usize,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub span_days: i64,
    pub event_types: BTreeMap<String, usize>,
    pub sources: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct TimelineAnalyzer {
    config: TimelineConfig,
    events: Vec<TimelineEvent>,
}

impl TimelineAnalyzer {
    pub fn new(config: TimelineConfig) -> Self {
        Self {
            config,
            events: Vec::new(),
        }
    }

    /// Insert keeping timestamp order, after any events with the same timestamp
    pub fn add_event(&mut self, event: TimelineEvent) {
        let at = self.events.partition_point(|e| e.timestamp <= event.timestamp);
        self.events.insert(at, event);
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Creation and last-activity events from found profiles' metadata
    pub fn build_from_profiles(&mut self, profiles: &[ProfileResult]) {
        let before = self.events.len();
        for profile in profiles.iter().filter(|p| p.exists) {
            let profile_ref = profile.profile_ref();
            let keys = CREATED_KEYS
                .iter()
                .map(|k| (*k, EVENT_PROFILE_CREATED, "Profile created"))
                .chain(
                    ACTIVITY_KEYS
                        .iter()
                        .map(|k| (*k, EVENT_LAST_ACTIVITY, "Last activity")),
                );

            for (key, event_type, title) in keys {
                let Some(raw) = profile.metadata.get(key) else {
                    continue;
                };
                let Some(timestamp) = parse_timestamp(raw) else {
                    debug!("Unparseable {} on {}: {}", key, profile.platform, raw);
                    continue;
                };

                let mut metadata = BTreeMap::new();
                metadata.insert("profile".to_string(), profile_ref.node_id());
                metadata.insert("identifier".to_string(), profile.identifier.clone());
                metadata.insert("url".to_string(), profile.url.clone());
                self.add_event(TimelineEvent {
                    id: format!("{}:{}", event_type, profile_ref.node_id()),
                    timestamp,
                    event_type: event_type.to_string(),
                    source: profile.platform.clone(),
                    title: format!("{}: {}", title, profile_ref),
                    description: String::new(),
                    metadata,
                });
            }
        }
        debug!("Timeline gained {} events", self.events.len() - before);
    }

    /// Events with `start <= timestamp <= end`
    pub fn events_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&TimelineEvent> {
        let from = self.events.partition_point(|e| e.timestamp < start);
        let to = self.events.partition_point(|e| e.timestamp <= end);
        if from >= to {
            return Vec::new();
        }
        self.events[from..to].iter().collect()
    }

    pub fn events_by_type(&self, event_type: &str) -> Vec<&TimelineEvent> {
        self.events.iter().filter(|e| e.event_type == event_type).collect()
    }

    pub fn events_by_source(&self, source: &str) -> Vec<&TimelineEvent> {
        self.events
            .iter()
            .filter(|e| e.source.eq_ignore_ascii_case(source))
            .collect()
    }

    pub fn activity_profile(&self) -> Option<ActivityProfile> {
        let earliest = self.events.first()?.timestamp;
        let latest = self.events.last()?.timestamp;

        let mut hourly = vec![0usize; 24];
        for event in &self.events {
            hourly[event.timestamp.hour() as usize] += 1;
        }
        let peak = hourly.iter().copied().max().unwrap_or(0);
        let peak_hour = hourly.iter().position(|&n| n == peak).unwrap_or(0) as u32;

        Some(ActivityProfile {
            earliest,
            latest,
            span_days: (latest - earliest).num_days(),
            total_events: self.events.len(),
            peak_hour,
            hourly,
        })
    }

    /// Gaps, dense clusters and periodicity candidates, in that order
    pub fn find_temporal_patterns(&self) -> Vec<TemporalPattern> {
        let mut patterns = self.activity_gaps();
        patterns.extend(self.temporal_clusters());
        patterns.extend(self.periodicity());
        patterns
    }

    fn activity_gaps(&self) -> Vec<TemporalPattern> {
        let threshold = self.config.gap_threshold_days.max(1);
        self.events
            .windows(2)
            .filter_map(|pair| {
                let gap = (pair[1].timestamp - pair[0].timestamp).num_days();
                (gap > threshold).then(|| TemporalPattern {
                    kind: TemporalPatternKind::ActivityGap,
                    start: pair[0].timestamp,
                    end: pair[1].timestamp,
                    confidence: (0.5 + 0.1 * (gap as f64 / threshold as f64)).min(0.9),
                    evidence: vec![pair[0].id.clone(), pair[1].id.clone()],
                    description: format!("{} day gap in activity", gap),
                })
            })
            .collect()
    }

    fn temporal_clusters(&self) -> Vec<TemporalPattern> {
        let window = chrono::Duration::hours(self.config.cluster_window_hours.max(1));
        let min_events = self.config.cluster_min_events.max(2);
        let mut clusters = Vec::new();

        let mut start = 0;
        while start < self.events.len() {
            let opened = self.events[start].timestamp;
            let end = start
                + self.events[start..]
                    .iter()
                    .take_while(|e| e.timestamp - opened <= window)
                    .count();

            let count = end - start;
            if count >= min_events {
                let members = &self.events[start..end];
                clusters.push(TemporalPattern {
                    kind: TemporalPatternKind::TemporalCluster,
                    start: opened,
                    end: members[count - 1].timestamp,
                    confidence: (0.4 + 0.1 * (count - min_events) as f64).min(0.9),
                    evidence: members.iter().map(|e| e.id.clone()).collect(),
                    description: format!(
                        "{} events within {} hours",
                        count, self.config.cluster_window_hours
                    ),
                });
                start = end;
            } else {
                start += 1;
            }
        }
        clusters
    }

    fn periodicity(&self) -> Vec<TemporalPattern> {
        // Interval histogram in whole days; same-day repeats say nothing about a period
        let mut histogram: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, pair) in self.events.windows(2).enumerate() {
            let days = (pair[1].timestamp - pair[0].timestamp).num_days();
            if days >= 1 {
                histogram.entry(days).or_default().push(i);
            }
        }
        let intervals: usize = histogram.values().map(Vec::len).sum();

        let Some((days, pairs)) = histogram
            .into_iter()
            .filter(|(_, pairs)| pairs.len() >= self.config.periodicity_min_repeats.max(2))
            .max_by(|(a_days, a), (b_days, b)| a.len().cmp(&b.len()).then_with(|| b_days.cmp(a_days)))
        else {
            return Vec::new();
        };

        let (first, last) = (pairs[0], pairs[pairs.len() - 1] + 1);
        let mut evidence: Vec<String> = pairs
            .iter()
            .flat_map(|&i| [self.events[i].id.clone(), self.events[i + 1].id.clone()])
            .collect();
        evidence.dedup();

        vec![TemporalPattern {
            kind: TemporalPatternKind::Periodicity,
            start: self.events[first].timestamp,
            end: self.events[last].timestamp,
            confidence: (pairs.len() as f64 / intervals as f64).min(0.9),
            evidence,
            description: format!("Activity repeats every {} days ({} times)", days, pairs.len()),
        }]
    }

    pub fn statistics(&self) -> TimelineStatistics {
        let mut stats = TimelineStatistics {
            total_events: self.events.len(),
            earliest: self.events.first().map(|e| e.timestamp),
            latest: self.events.last().map(|e| e.timestamp),
            ..TimelineStatistics::default()
        };
        if let (Some(earliest), Some(latest)) = (stats.earliest, stats.latest) {
            stats.span_days = (latest - earliest).num_days();
        }
        for event in &self.events {
            *stats.event_types.entry(event.event_type.clone()).or_insert(0) += 1;
            *stats.sources.entry(event.source.clone()).or_insert(0) += 1;
        }
        stats
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Export<'a> {
            events: &'a [TimelineEvent],
        }
        serde_json::to_string_pretty(&Export {
            events: &self.events,
        })
    }
}

/// RFC 3339, `YYYY-MM-DD` (midnight UTC), or unix seconds
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use hound_core::{IdentifierKind, Platform, ProbeRequest};

    fn at(raw: &str) -> DateTime<Utc> {
        parse_timestamp(raw).unwrap()
    }

    fn event(id: &str, timestamp: DateTime<Utc>) -> TimelineEvent {
        TimelineEvent {
            id: id.to_string(),
            timestamp,
            event_type: "post".to_string(),
            source: "Forum".to_string(),
            title: id.to_string(),
            description: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(at("2020-01-02T03:04:05Z"), at("1577934245"));
        assert_eq!(at("2020-01-02").hour(), 0);
        assert_eq!(at("2020-01-02T05:00:00+02:00").hour(), 3);
        assert!(parse_timestamp("last tuesday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_add_event_is_stable() {
        let mut timeline = TimelineAnalyzer::default();
        let noon = at("2021-06-01T12:00:00Z");
        timeline.add_event(event("second", noon));
        timeline.add_event(event("first", noon - Duration::hours(1)));
        timeline.add_event(event("third", noon));

        let ids: Vec<_> = timeline.events().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_build_from_profiles() {
        let platform = Platform::new("HackerNews", "https://news.test/user?id={username}");
        let request = ProbeRequest::new(&platform, "alice", IdentifierKind::Username);
        let mut metadata = BTreeMap::new();
        metadata.insert("created_at".to_string(), "2015-03-01".to_string());
        metadata.insert("last_active".to_string(), "1700000000".to_string());
        metadata.insert("joined".to_string(), "sometime".to_string());
        let found = ProfileResult::found(&request, "https://news.test/user?id=alice")
            .with_metadata(metadata.clone());
        let mut absent = found.clone();
        absent.exists = false;

        let mut timeline = TimelineAnalyzer::default();
        timeline.build_from_profiles(&[found, absent]);

        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.events()[0].event_type, EVENT_PROFILE_CREATED);
        assert_eq!(timeline.events()[1].event_type, EVENT_LAST_ACTIVITY);
        assert_eq!(timeline.events_by_source("hackernews").len(), 2);
    }

    #[test]
    fn test_range_and_type_queries() {
        let mut timeline = TimelineAnalyzer::default();
        let base = at("2022-01-01T00:00:00Z");
        for day in 0..5 {
            timeline.add_event(event(&format!("d{}", day), base + Duration::days(day)));
        }

        let hits = timeline.events_in_range(base + Duration::days(1), base + Duration::days(3));
        let ids: Vec<_> = hits.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2", "d3"]);
        assert!(timeline.events_in_range(base + Duration::days(9), base).is_empty());
        assert_eq!(timeline.events_by_type("post").len(), 5);
        assert!(timeline.events_by_type("login").is_empty());
    }

    #[test]
    fn test_gap_and_cluster_detection() {
        let mut timeline = TimelineAnalyzer::default();
        let base = at("2022-01-01T08:00:00Z");
        for (i, hours) in [0, 2, 5].iter().enumerate() {
            timeline.add_event(event(&format!("burst{}", i), base + Duration::hours(*hours)));
        }
        timeline.add_event(event("later", base + Duration::days(90)));

        let patterns = timeline.find_temporal_patterns();
        let gap = patterns
            .iter()
            .find(|p| p.kind == TemporalPatternKind::ActivityGap)
            .unwrap();
        assert_eq!(gap.evidence, vec!["burst2", "later"]);

        let cluster = patterns
            .iter()
            .find(|p| p.kind == TemporalPatternKind::TemporalCluster)
            .unwrap();
        assert_eq!(cluster.evidence.len(), 3);
        assert!(cluster.confidence > 0.0 && cluster.confidence <= 0.9);
    }

    #[test]
    fn test_periodicity_candidate() {
        let mut timeline = TimelineAnalyzer::default();
        let base = at("2022-01-01T08:00:00Z");
        for week in 0..5 {
            timeline.add_event(event(&format!("w{}", week), base + Duration::days(7 * week)));
        }

        let periodic: Vec<_> = timeline
            .find_temporal_patterns()
            .into_iter()
            .filter(|p| p.kind == TemporalPatternKind::Periodicity)
            .collect();
        assert_eq!(periodic.len(), 1);
        assert!(periodic[0].description.contains("every 7 days"));
        assert_eq!(periodic[0].confidence, 0.9);
        assert_eq!(periodic[0].evidence.len(), 5);
    }

    #[test]
    fn test_activity_profile_and_statistics() {
        let mut timeline = TimelineAnalyzer::default();
        assert!(timeline.activity_profile().is_none());
        assert_eq!(timeline.statistics().total_events, 0);

        let base = at("2022-01-01T21:00:00Z");
        timeline.add_event(event("a", base));
        timeline.add_event(event("b", base + Duration::days(10)));
        timeline.add_event(event("c", base + Duration::days(10) + Duration::hours(3)));

        let profile = timeline.activity_profile().unwrap();
        assert_eq!(profile.peak_hour, 21);
        assert_eq!(profile.span_days, 10);

        let stats = timeline.statistics();
        assert_eq!(stats.sources["Forum"], 3);
        assert_eq!(stats.span_days, 10);

        let json: serde_json::Value = serde_json::from_str(&timeline.to_json().unwrap()).unwrap();
        assert_eq!(json["events"].as_array().unwrap().len(), 3);
    }
}
