//! Tracehound Analysis
//!
//! Turns a set of found profiles into an investigative picture:
//! - **Correlation**: weighted pairwise similarity, shared attributes, recurring patterns
//! - **Graph**: profile/identifier nodes linked by correlation, clustered by component
//! - **Timeline**: dated events from profile metadata and the temporal patterns in them
//!
//! Only profiles with `exists == true` are considered.

pub mod correlation;
pub mod graph;
pub mod timeline;

pub use correlation::*;
pub use graph::*;
pub use timeline::*;

use serde::{Deserialize, Serialize};

/// Default similarity above which two profiles are linked in the graph
pub const DEFAULT_GRAPH_THRESHOLD: f64 = 0.5;

/// Settings for the analysis stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub correlation: CorrelationConfig,
    pub graph_threshold: f64,
    pub timeline: TimelineConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            correlation: CorrelationConfig::default(),
            graph_threshold: DEFAULT_GRAPH_THRESHOLD,
            timeline: TimelineConfig::default(),
        }
    }
}
