//! Relationship graph over profiles and identifiers
//!
//! Undirected and weighted. Connected components are the clusters; inside a
//! large component, weighted-degree centrality surfaces the hub identities.

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::{Bfs, EdgeRef};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

use hound_core::ProfileResult;

use crate::CorrelationAnalyzer;

/// Components at least this large get hub ranking
pub const HUB_MIN_COMPONENT: usize = 4;

/// Hubs reported per cluster
const MAX_HUBS: usize = 3;

/// Weight of each verbatim shared attribute on a link
const SHARED_ATTRIBUTE_WEIGHT: f64 = 0.3;

/// Metadata fields whose verbatim equality links two profiles
const DECLARED_FIELDS: &[&str] = &["display_name", "email", "phone", "website", "location"];

/// Metadata fields that become their own attribute nodes
const ATTRIBUTE_NODES: &[(&str, NodeKind, EdgeKind)] = &[
    ("email", NodeKind::Email, EdgeKind::HasEmail),
    ("phone", NodeKind::Phone, EdgeKind::HasPhone),
    ("location", NodeKind::Location, EdgeKind::LocatedIn),
];

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Self loop on {0}")]
    SelfLoop(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Profile,
    Identifier,
    Email,
    Phone,
    Location,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Profile => "profile",
            NodeKind::Identifier => "identifier",
            NodeKind::Email => "email",
            NodeKind::Phone => "phone",
            NodeKind::Location => "location",
        }
    }

    fn color(&self) -> &'static str {
        match self {
            NodeKind::Profile => "lightblue",
            NodeKind::Identifier => "lightgrey",
            NodeKind::Email => "lightgreen",
            NodeKind::Phone => "lightyellow",
            NodeKind::Location => "lightpink",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Profile registered under an identifier
    Uses,
    HasEmail,
    HasPhone,
    LocatedIn,
    /// Similarity above the link threshold
    Correlated,
    /// Verbatim shared declared attributes
    SharesAttribute,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Uses => "uses",
            EdgeKind::HasEmail => "has_email",
            EdgeKind::HasPhone => "has_phone",
            EdgeKind::LocatedIn => "located_in",
            EdgeKind::Correlated => "correlated",
            EdgeKind::SharesAttribute => "shares_attribute",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    pub weight: f64,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// A connected component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub nodes: BTreeSet<String>,
    /// Most central nodes, only for components of at least [`HUB_MIN_COMPONENT`] nodes
    pub hubs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub node_count: usize,
    pub edge_count: usize,
    pub node_kinds: BTreeMap<String, usize>,
    pub average_degree: f64,
    pub clusters: usize,
}

#[derive(Serialize)]
struct GraphExport<'a> {
    nodes: Vec<&'a GraphNode>,
    edges: Vec<&'a GraphEdge>,
}

/// Undirected weighted graph keyed by node id
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    graph: UnGraph<GraphNode, GraphEdge>,
    index: HashMap<String, NodeIndex>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, or replace the label and attributes of an existing one
    pub fn add_node(&mut self, node: GraphNode) {
        match self.index.get(&node.id) {
            Some(&idx) => self.graph[idx] = node,
            None => {
                let id = node.id.clone();
                let idx = self.graph.add_node(node);
                self.index.insert(id, idx);
            }
        }
    }

    pub fn add_edge(&mut self, edge: GraphEdge) -> Result<(), GraphError> {
        let source = self.index_of(&edge.source)?;
        let target = self.index_of(&edge.target)?;
        if source == target {
            return Err(GraphError::SelfLoop(edge.source));
        }
        self.graph.add_edge(source, target, edge);
        Ok(())
    }

    fn index_of(&self, id: &str) -> Result<NodeIndex, GraphError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_weights()
    }

    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.graph.edge_weights()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn neighbors(&self, id: &str) -> Vec<&GraphNode> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut adjacent: Vec<NodeIndex> = self.graph.neighbors(idx).collect();
        adjacent.sort();
        adjacent.dedup();
        adjacent.into_iter().map(|n| &self.graph[n]).collect()
    }

    /// Every node reachable from `id`, including itself; empty for unknown ids
    pub fn connected_component(&self, id: &str) -> BTreeSet<String> {
        let mut component = BTreeSet::new();
        let Some(&start) = self.index.get(id) else {
            return component;
        };

        let mut bfs = Bfs::new(&self.graph, start);
        while let Some(idx) = bfs.next(&self.graph) {
            component.insert(self.graph[idx].id.clone());
        }
        component
    }

    /// Weighted degree per node, normalized so the most central node scores 1.0
    pub fn centrality(&self) -> BTreeMap<String, f64> {
        let mut weighted: BTreeMap<String, f64> = self
            .graph
            .node_indices()
            .map(|idx| {
                let total: f64 = self
                    .graph
                    .edges(idx)
                    .map(|edge| edge.weight().weight.max(0.0))
                    .sum();
                (self.graph[idx].id.clone(), total)
            })
            .collect();

        let max = weighted.values().copied().fold(0.0, f64::max);
        if max > 0.0 {
            for value in weighted.values_mut() {
                *value /= max;
            }
        }
        weighted
    }

    /// Partition every node into its connected component, largest first
    pub fn find_clusters(&self) -> Vec<Cluster> {
        let mut components = UnionFind::<usize>::new(self.graph.node_count());
        for edge in self.graph.edge_references() {
            components.union(edge.source().index(), edge.target().index());
        }

        let mut grouped: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
        for (position, root) in components.into_labeling().into_iter().enumerate() {
            grouped
                .entry(root)
                .or_default()
                .insert(self.graph[NodeIndex::new(position)].id.clone());
        }

        let centrality = self.centrality();
        let mut clusters: Vec<Cluster> = grouped
            .into_values()
            .map(|nodes| {
                let hubs = if nodes.len() >= HUB_MIN_COMPONENT {
                    rank_hubs(&nodes, &centrality)
                } else {
                    Vec::new()
                };
                Cluster { nodes, hubs }
            })
            .collect();

        clusters.sort_by(|a, b| {
            b.nodes
                .len()
                .cmp(&a.nodes.len())
                .then_with(|| a.nodes.first().cmp(&b.nodes.first()))
        });
        clusters
    }

    pub fn statistics(&self) -> GraphStatistics {
        let mut node_kinds = BTreeMap::new();
        for node in self.graph.node_weights() {
            *node_kinds.entry(node.kind.as_str().to_string()).or_insert(0) += 1;
        }
        let average_degree = if self.graph.node_count() == 0 {
            0.0
        } else {
            2.0 * self.graph.edge_count() as f64 / self.graph.node_count() as f64
        };

        GraphStatistics {
            node_count: self.graph.node_count(),
            edge_count: self.graph.edge_count(),
            node_kinds,
            average_degree,
            clusters: self.find_clusters().len(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Graphviz DOT rendering
    pub fn to_dot(&self) -> String {
        let mut lines = vec![
            "graph tracehound {".to_string(),
            "  rankdir=LR;".to_string(),
            "  node [shape=box, style=filled];".to_string(),
        ];
        for node in self.graph.node_weights() {
            lines.push(format!(
                "  \"{}\" [label=\"{}\", fillcolor=\"{}\"];",
                escape(&node.id),
                escape(&node.label),
                node.kind.color()
            ));
        }
        for edge in self.graph.edge_weights() {
            lines.push(format!(
                "  \"{}\" -- \"{}\" [label=\"{} ({:.2})\"];",
                escape(&edge.source),
                escape(&edge.target),
                edge.kind.as_str(),
                edge.weight
            ));
        }
        lines.push("}".to_string());
        lines.join("\n")
    }

    /// Profile nodes for every found profile, linked to their identifiers and
    /// declared attributes, and to each other by correlation
    pub fn build_from_profiles(
        profiles: &[ProfileResult],
        analyzer: &CorrelationAnalyzer,
        threshold: f64,
    ) -> Self {
        let mut graph = Self::new();
        let found: Vec<&ProfileResult> = profiles.iter().filter(|p| p.exists).collect();

        for profile in &found {
            let id = profile.profile_ref().node_id();
            let mut attributes = BTreeMap::new();
            attributes.insert("platform".to_string(), profile.platform.clone());
            attributes.insert("identifier".to_string(), profile.identifier.clone());
            attributes.insert("url".to_string(), profile.url.clone());
            graph.add_node(GraphNode {
                id: id.clone(),
                label: profile.profile_ref().to_string(),
                kind: NodeKind::Profile,
                attributes,
            });

            let identifier_id = format!(
                "identifier:{}:{}",
                profile.kind,
                profile.identifier.to_lowercase()
            );
            graph.link_attribute(
                &id,
                identifier_id,
                &profile.identifier,
                NodeKind::Identifier,
                EdgeKind::Uses,
            );

            for (field, kind, edge) in ATTRIBUTE_NODES {
                if let Some(value) = profile.metadata.get(*field).filter(|v| !v.trim().is_empty()) {
                    let node_id = format!("{}:{}", field, value.trim().to_lowercase());
                    graph.link_attribute(&id, node_id, value.trim(), *kind, *edge);
                }
            }
        }

        for (i, a) in found.iter().enumerate() {
            for b in &found[i + 1..] {
                let score = analyzer.similarity(a, b);
                let shared = declared_shared(a, b);
                if score <= threshold && shared.is_empty() {
                    continue;
                }

                let (kind, weight) = if score > threshold {
                    (EdgeKind::Correlated, score)
                } else {
                    (
                        EdgeKind::SharesAttribute,
                        (SHARED_ATTRIBUTE_WEIGHT * shared.len() as f64).min(1.0),
                    )
                };
                let mut attributes = BTreeMap::new();
                attributes.insert("similarity".to_string(), format!("{:.3}", score));
                if !shared.is_empty() {
                    attributes.insert("shared".to_string(), shared.join(","));
                }
                graph.link(GraphEdge {
                    source: a.profile_ref().node_id(),
                    target: b.profile_ref().node_id(),
                    kind,
                    weight,
                    attributes,
                });
            }
        }

        debug!(
            "Built graph with {} nodes and {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        graph
    }

    fn link_attribute(
        &mut self,
        profile_id: &str,
        node_id: String,
        label: &str,
        kind: NodeKind,
        edge: EdgeKind,
    ) {
        if !self.index.contains_key(&node_id) {
            let mut attributes = BTreeMap::new();
            attributes.insert("value".to_string(), label.to_string());
            self.add_node(GraphNode {
                id: node_id.clone(),
                label: label.to_string(),
                kind,
                attributes,
            });
        }
        self.link(GraphEdge {
            source: profile_id.to_string(),
            target: node_id,
            kind: edge,
            weight: 1.0,
            attributes: BTreeMap::new(),
        });
    }

    fn link(&mut self, edge: GraphEdge) {
        let kind = edge.kind;
        if let Err(e) = self.add_edge(edge) {
            warn!("Dropped {} edge: {}", kind.as_str(), e);
        }
    }
}

impl Serialize for RelationshipGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        GraphExport {
            nodes: self.graph.node_weights().collect(),
            edges: self.graph.edge_weights().collect(),
        }
        .serialize(serializer)
    }
}

fn rank_hubs(nodes: &BTreeSet<String>, centrality: &BTreeMap<String, f64>) -> Vec<String> {
    let score = |id: &String| centrality.get(id).copied().unwrap_or(0.0);
    let mut ranked: Vec<&String> = nodes.iter().collect();
    ranked.sort_by(|a, b| score(b).total_cmp(&score(a)).then_with(|| a.cmp(b)));
    ranked.into_iter().take(MAX_HUBS).cloned().collect()
}

fn declared_shared(a: &ProfileResult, b: &ProfileResult) -> Vec<String> {
    DECLARED_FIELDS
        .iter()
        .filter(|field| {
            match (a.metadata.get(**field), b.metadata.get(**field)) {
                (Some(x), Some(y)) => {
                    !x.trim().is_empty() && x.trim().eq_ignore_ascii_case(y.trim())
                }
                _ => false,
            }
        })
        .map(|field| field.to_string())
        .collect()
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
