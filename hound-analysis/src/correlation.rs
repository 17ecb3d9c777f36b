//! Pairwise profile correlation
//!
//! Similarity is a weighted average of per-attribute match strengths, each in
//! [0, 1]: platform equality, identifier edit distance, and every metadata field
//! both profiles carry. High-signal fields (email, display name) weigh far more
//! than being on the same platform.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use hound_core::{IdentifierKind, ProfileRef, ProfileResult};

/// Identifier similarity at which it is reported as evidence
const IDENTIFIER_EVIDENCE: f64 = 0.8;

/// Shortest value that counts for a substring match
const MIN_PARTIAL_LEN: usize = 3;

/// Common prefix/suffix length that makes a username pattern
const MIN_AFFIX_LEN: usize = 3;

/// Per-attribute weights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationWeights {
    pub fields: BTreeMap<String, f64>,
    /// Weight for metadata fields without an entry
    pub default_weight: f64,
}

impl Default for CorrelationWeights {
    fn default() -> Self {
        let fields = [
            ("platform", 0.5),
            ("identifier", 2.0),
            ("display_name", 3.0),
            ("email", 4.0),
            ("phone", 4.0),
            ("website", 3.0),
            ("avatar", 2.5),
            ("location", 1.5),
            ("bio", 1.0),
        ]
        .into_iter()
        .map(|(field, weight)| (field.to_string(), weight))
        .collect();

        Self {
            fields,
            default_weight: 1.0,
        }
    }
}

impl CorrelationWeights {
    pub fn weight_for(&self, field: &str) -> f64 {
        self.fields.get(field).copied().unwrap_or(self.default_weight)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub weights: CorrelationWeights,
    /// Pairs scoring below this are left out of `correlate`
    pub report_floor: f64,
    /// Weighted evidence that saturates confidence at 1.0
    pub confidence_scale: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            weights: CorrelationWeights::default(),
            report_floor: 0.3,
            confidence_scale: 10.0,
        }
    }
}

/// One attribute two profiles agree on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedAttribute {
    pub field: String,
    pub value: String,
    /// 1.0 exact, 0.5 partial, edit-distance similarity for identifiers
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationScore {
    pub a: ProfileRef,
    pub b: ProfileRef,
    pub score: f64,
    pub shared_attributes: Vec<SharedAttribute>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// The same identifier registered on several platforms
    IdentifierReuse,
    /// Distinct usernames sharing a prefix or suffix
    UsernameSimilarity,
    EmailDomain,
    DisplayNameReuse,
    LocationCluster,
}

/// A recurring attribute across a profile set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub kind: PatternKind,
    /// Profiles or values supporting the pattern
    pub evidence: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub confidence: f64,
    pub description: String,
}

/// Profiles sharing one attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedValue {
    pub field: String,
    pub value: String,
    pub profiles: Vec<ProfileRef>,
}

#[derive(Debug, Clone, Default)]
pub struct CorrelationAnalyzer {
    config: CorrelationConfig,
}

impl CorrelationAnalyzer {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Symmetric similarity in [0, 1]
    pub fn similarity(&self, a: &ProfileResult, b: &ProfileResult) -> f64 {
        self.compare(a, b).0
    }

    /// Score one pair, with its evidence
    pub fn score(&self, a: &ProfileResult, b: &ProfileResult) -> CorrelationScore {
        let (score, shared_attributes) = self.compare(a, b);
        let mut result = CorrelationScore {
            a: a.profile_ref(),
            b: b.profile_ref(),
            score,
            shared_attributes,
            confidence: 0.0,
        };
        result.confidence = self.confidence_score(&result.shared_attributes);
        result
    }

    /// Every found pair scoring at least the report floor, best first
    pub fn correlate(&self, profiles: &[ProfileResult]) -> Vec<CorrelationScore> {
        let found: Vec<&ProfileResult> = profiles.iter().filter(|p| p.exists).collect();
        let mut scores = Vec::new();

        for (i, a) in found.iter().enumerate() {
            for b in &found[i + 1..] {
                let score = self.score(a, b);
                if score.score >= self.config.report_floor {
                    scores.push(score);
                }
            }
        }

        scores.sort_by(|x, y| {
            y.score
                .total_cmp(&x.score)
                .then_with(|| x.a.cmp(&y.a))
                .then_with(|| x.b.cmp(&y.b))
        });
        debug!("Correlated {} profiles into {} pairs", found.len(), scores.len());
        scores
    }

    /// Monotonic in corroborating attributes times their weight, capped at 1.0
    pub fn confidence_score(&self, shared: &[SharedAttribute]) -> f64 {
        if self.config.confidence_scale <= 0.0 {
            return if shared.is_empty() { 0.0 } else { 1.0 };
        }
        let evidence: f64 = shared
            .iter()
            .map(|attr| self.config.weights.weight_for(&attr.field) * attr.strength)
            .sum();
        (evidence / self.config.confidence_scale).min(1.0)
    }

    /// Attribute values (identifier included) that more than one found profile carries
    pub fn find_shared_attributes(&self, profiles: &[ProfileResult]) -> Vec<SharedValue> {
        let mut seen: BTreeMap<(String, String), (String, Vec<ProfileRef>)> = BTreeMap::new();

        for profile in profiles.iter().filter(|p| p.exists) {
            let fields = std::iter::once(("identifier", profile.identifier.as_str())).chain(
                profile
                    .metadata
                    .iter()
                    .map(|(field, value)| (field.as_str(), value.as_str())),
            );
            for (field, value) in fields {
                let normalized = normalize(value);
                if normalized.is_empty() {
                    continue;
                }
                let (_, refs) = seen
                    .entry((field.to_string(), normalized))
                    .or_insert_with(|| (value.to_string(), Vec::new()));
                let profile_ref = profile.profile_ref();
                if !refs.contains(&profile_ref) {
                    refs.push(profile_ref);
                }
            }
        }

        seen.into_iter()
            .filter(|(_, (_, refs))| refs.len() > 1)
            .map(|((field, _), (value, profiles))| SharedValue {
                field,
                value,
                profiles,
            })
            .collect()
    }

    /// Recurring identifiers, username shapes, email domains, names and locations
    pub fn detect_patterns(&self, profiles: &[ProfileResult]) -> Vec<Pattern> {
        let found: Vec<&ProfileResult> = profiles.iter().filter(|p| p.exists).collect();
        [
            identifier_reuse(&found),
            username_similarity(&found),
            email_domain(&found),
            repeated_field(
                &found,
                "display_name",
                PatternKind::DisplayNameReuse,
                0.75,
                "Display name reused",
            ),
            repeated_field(
                &found,
                "location",
                PatternKind::LocationCluster,
                0.6,
                "Multiple profiles in the same location",
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn compare(&self, a: &ProfileResult, b: &ProfileResult) -> (f64, Vec<SharedAttribute>) {
        let weights = &self.config.weights;
        let mut total = 0.0;
        let mut matched = 0.0;
        let mut shared = Vec::new();

        let weight = weights.weight_for("platform");
        total += weight;
        if a.platform.eq_ignore_ascii_case(&b.platform) {
            matched += weight;
            shared.push(SharedAttribute {
                field: "platform".to_string(),
                value: a.platform.clone(),
                strength: 1.0,
            });
        }

        let weight = weights.weight_for("identifier");
        let similarity =
            strsim::normalized_levenshtein(&a.identifier.to_lowercase(), &b.identifier.to_lowercase());
        total += weight;
        matched += weight * similarity;
        if similarity >= IDENTIFIER_EVIDENCE {
            shared.push(SharedAttribute {
                field: "identifier".to_string(),
                value: a.identifier.clone(),
                strength: similarity,
            });
        }

        // BTreeMap order keeps the sum identical for (a, b) and (b, a)
        for (field, value_a) in &a.metadata {
            let Some(value_b) = b.metadata.get(field) else {
                continue;
            };
            let weight = weights.weight_for(field);
            let strength = match_strength(value_a, value_b);
            total += weight;
            matched += weight * strength;
            if strength > 0.0 {
                shared.push(SharedAttribute {
                    field: field.clone(),
                    value: value_a.clone(),
                    strength,
                });
            }
        }

        if total <= 0.0 {
            return (0.0, shared);
        }
        ((matched / total).clamp(0.0, 1.0), shared)
    }
}

fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 1.0 for equal values, 0.5 when one contains the other
fn match_strength(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize(a), normalize(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let (shorter, longer) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    if shorter.chars().count() >= MIN_PARTIAL_LEN && longer.contains(shorter.as_str()) {
        0.5
    } else {
        0.0
    }
}

fn identifier_reuse(found: &[&ProfileResult]) -> Option<Pattern> {
    let mut by_identifier: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for profile in found {
        by_identifier
            .entry(profile.identifier.to_lowercase())
            .or_default()
            .push(profile.platform.clone());
    }

    let (identifier, platforms) = by_identifier
        .into_iter()
        .filter(|(_, platforms)| platforms.len() > 1)
        .max_by(|(a_id, a), (b_id, b)| a.len().cmp(&b.len()).then_with(|| b_id.cmp(a_id)))?;

    let mut attributes = BTreeMap::new();
    attributes.insert("identifier".to_string(), identifier.clone());
    attributes.insert("platforms".to_string(), platforms.len().to_string());
    Some(Pattern {
        kind: PatternKind::IdentifierReuse,
        description: format!("{} is registered on {} platforms", identifier, platforms.len()),
        confidence: (0.5 + 0.1 * platforms.len() as f64).min(0.95),
        evidence: platforms,
        attributes,
    })
}

fn username_similarity(found: &[&ProfileResult]) -> Option<Pattern> {
    let mut usernames: Vec<String> = found
        .iter()
        .filter(|p| p.kind == IdentifierKind::Username)
        .map(|p| p.identifier.to_lowercase())
        .collect();
    usernames.sort();
    usernames.dedup();
    if usernames.len() < 2 {
        return None;
    }

    let prefix = common_prefix(&usernames);
    let suffix = common_suffix(&usernames);
    if prefix.chars().count() < MIN_AFFIX_LEN && suffix.chars().count() < MIN_AFFIX_LEN {
        return None;
    }

    let mut attributes = BTreeMap::new();
    attributes.insert("prefix".to_string(), prefix.clone());
    attributes.insert("suffix".to_string(), suffix.clone());
    Some(Pattern {
        kind: PatternKind::UsernameSimilarity,
        description: format!("Usernames share a common shape: {}*{}", prefix, suffix),
        evidence: usernames,
        attributes,
        confidence: 0.7,
    })
}

fn email_domain(found: &[&ProfileResult]) -> Option<Pattern> {
    let mut emails: Vec<String> = found
        .iter()
        .flat_map(|p| {
            let identifier = (p.kind == IdentifierKind::Email).then(|| p.identifier.clone());
            identifier.into_iter().chain(p.metadata.get("email").cloned())
        })
        .map(|email| email.trim().to_lowercase())
        .filter(|email| email.contains('@'))
        .collect();
    emails.sort();
    emails.dedup();
    if emails.len() < 2 {
        return None;
    }

    let domain = emails[0].rsplit('@').next()?.to_string();
    if !emails.iter().all(|e| e.rsplit('@').next() == Some(domain.as_str())) {
        return None;
    }

    let mut attributes = BTreeMap::new();
    attributes.insert("domain".to_string(), domain.clone());
    Some(Pattern {
        kind: PatternKind::EmailDomain,
        description: format!("All emails use the same domain: {}", domain),
        evidence: emails,
        attributes,
        confidence: 0.8,
    })
}

fn repeated_field(
    found: &[&ProfileResult],
    field: &str,
    kind: PatternKind,
    confidence: f64,
    label: &str,
) -> Option<Pattern> {
    let mut counts: BTreeMap<String, (String, Vec<String>)> = BTreeMap::new();
    for profile in found {
        if let Some(value) = profile.metadata.get(field) {
            let normalized = normalize(value);
            if normalized.is_empty() {
                continue;
            }
            counts
                .entry(normalized)
                .or_insert_with(|| (value.clone(), Vec::new()))
                .1
                .push(profile.profile_ref().to_string());
        }
    }

    let (value, profiles) = counts
        .into_values()
        .filter(|(_, profiles)| profiles.len() > 1)
        .max_by(|(a_value, a), (b_value, b)| {
            a.len().cmp(&b.len()).then_with(|| b_value.cmp(a_value))
        })?;

    let mut attributes = BTreeMap::new();
    attributes.insert(field.to_string(), value.clone());
    attributes.insert("count".to_string(), profiles.len().to_string());
    Some(Pattern {
        kind,
        description: format!("{}: {}", label, value),
        evidence: profiles,
        attributes,
        confidence,
    })
}

fn common_prefix(values: &[String]) -> String {
    let Some(first) = values.first() else {
        return String::new();
    };
    let mut prefix: Vec<char> = first.chars().collect();
    for value in &values[1..] {
        let shared = prefix
            .iter()
            .zip(value.chars())
            .take_while(|(a, b)| **a == *b)
            .count();
        prefix.truncate(shared);
    }
    prefix.into_iter().collect()
}

fn common_suffix(values: &[String]) -> String {
    let reversed: Vec<String> = values.iter().map(|v| v.chars().rev().collect()).collect();
    common_prefix(&reversed).chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound_core::{Platform, ProbeRequest};

    fn profile(platform: &str, identifier: &str, metadata: &[(&str, &str)]) -> ProfileResult {
        let platform = Platform::new(platform, "https://example.test/{username}");
        let request = ProbeRequest::new(&platform, identifier, IdentifierKind::Username);
        ProfileResult::found(&request, &platform.build_url(identifier, IdentifierKind::Username))
            .with_metadata(
                metadata
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            )
    }

    #[test]
    fn test_similarity_symmetric_and_bounded() {
        let analyzer = CorrelationAnalyzer::default();
        let profiles = vec![
            profile("GitHub", "alice123", &[("display_name", "Alice Example"), ("location", "Berlin")]),
            profile("GitLab", "alice_123", &[("display_name", "alice example"), ("bio", "Rust dev")]),
            profile("Reddit", "zz_top", &[("location", "Berlin, Germany")]),
            profile("Twitter", "alice123", &[]),
        ];

        for a in &profiles {
            for b in &profiles {
                let ab = analyzer.similarity(a, b);
                let ba = analyzer.similarity(b, a);
                assert_eq!(ab, ba);
                assert!((0.0..=1.0).contains(&ab));
            }
        }
        assert_eq!(analyzer.similarity(&profiles[0], &profiles[0]), 1.0);
    }

    #[test]
    fn test_high_signal_fields_dominate() {
        let analyzer = CorrelationAnalyzer::default();
        let a = profile("GitHub", "alice", &[("email", "alice@example.com")]);
        let b = profile("Keybase", "a.smith", &[("email", "Alice@Example.com")]);
        let c = profile("GitHub", "bob", &[("email", "bob@example.com")]);

        assert!(analyzer.similarity(&a, &b) > analyzer.similarity(&a, &c));
    }

    #[test]
    fn test_correlate_sorted_and_floored() {
        let analyzer = CorrelationAnalyzer::default();
        let mut absent = profile("Steam", "alice123", &[]);
        absent.exists = false;
        let profiles = vec![
            profile("GitHub", "alice123", &[("display_name", "Alice")]),
            profile("GitLab", "alice123", &[("display_name", "Alice")]),
            profile("Twitch", "qqqqqq", &[]),
            absent,
        ];

        let scores = analyzer.correlate(&profiles);
        assert!(!scores.is_empty());
        assert!(scores.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(scores.iter().all(|s| s.score >= 0.3));
        assert!(scores.iter().all(|s| s.a.platform != "Steam" && s.b.platform != "Steam"));

        let best = &scores[0];
        assert_eq!(best.a.platform, "GitHub");
        assert_eq!(best.b.platform, "GitLab");
        assert!(best.shared_attributes.iter().any(|s| s.field == "display_name"));
        assert!(best.confidence > 0.0 && best.confidence <= 1.0);
    }

    #[test]
    fn test_confidence_monotonic_and_capped() {
        let analyzer = CorrelationAnalyzer::default();
        let attr = |field: &str| SharedAttribute {
            field: field.to_string(),
            value: "x".to_string(),
            strength: 1.0,
        };

        let one = analyzer.confidence_score(&[attr("bio")]);
        let two = analyzer.confidence_score(&[attr("bio"), attr("email")]);
        let many: Vec<_> = ["email", "phone", "display_name", "website"]
            .into_iter()
            .map(attr)
            .collect();

        assert!(two > one);
        assert_eq!(analyzer.confidence_score(&many), 1.0);
        assert_eq!(analyzer.confidence_score(&[]), 0.0);
    }

    #[test]
    fn test_find_shared_attributes() {
        let analyzer = CorrelationAnalyzer::default();
        let profiles = vec![
            profile("GitHub", "alice123", &[("location", "Berlin")]),
            profile("GitLab", "alice123", &[("location", " berlin ")]),
            profile("Reddit", "other", &[("location", "Paris")]),
        ];

        let shared = analyzer.find_shared_attributes(&profiles);
        let fields: Vec<_> = shared.iter().map(|s| s.field.as_str()).collect();
        assert_eq!(fields, vec!["identifier", "location"]);
        assert!(shared.iter().all(|s| s.profiles.len() == 2));
    }

    #[test]
    fn test_detect_patterns() {
        let analyzer = CorrelationAnalyzer::default();
        let profiles = vec![
            profile("GitHub", "darkfox", &[("display_name", "Dark Fox"), ("location", "Oslo")]),
            profile("GitLab", "darkfox", &[("display_name", "dark fox")]),
            profile("Reddit", "darkfox_99", &[("location", "Oslo")]),
        ];

        let patterns = analyzer.detect_patterns(&profiles);
        let kinds: Vec<_> = patterns.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                PatternKind::IdentifierReuse,
                PatternKind::UsernameSimilarity,
                PatternKind::DisplayNameReuse,
                PatternKind::LocationCluster,
            ]
        );

        let reuse = &patterns[0];
        assert_eq!(reuse.evidence, vec!["GitHub", "GitLab"]);
        assert_eq!(patterns[1].attributes["prefix"], "darkfox");
    }

    #[test]
    fn test_email_domain_pattern() {
        let analyzer = CorrelationAnalyzer::default();
        let profiles = vec![
            profile("GitHub", "a", &[("email", "a@corp.test")]),
            profile("GitLab", "b", &[("email", "b@corp.test")]),
        ];
        let patterns = analyzer.detect_patterns(&profiles);
        let domain = patterns
            .iter()
            .find(|p| p.kind == PatternKind::EmailDomain)
            .unwrap();
        assert_eq!(domain.attributes["domain"], "corp.test");
    }

    #[test]
    fn test_affixes() {
        let values = vec!["darkfox".to_string(), "darkfox_99".to_string()];
        assert_eq!(common_prefix(&values), "darkfox");
        assert_eq!(common_suffix(&values), "");

        let values = vec!["the_wolf".to_string(), "grey_wolf".to_string()];
        assert_eq!(common_suffix(&values), "_wolf");
    }
}
