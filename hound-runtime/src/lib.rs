//! Tracehound Runtime
//!
//! Wires the layers together:
//! - **Orchestrator**: fans one identifier out across every applicable platform
//!   under a global concurrency cap and a batch deadline
//! - **Investigation**: several identifiers in turn, then correlation, graph and timeline
//! - **Config**: the engine's TOML configuration

pub mod config;
pub mod investigation;
pub mod orchestrator;

pub use config::*;
pub use investigation::*;
pub use orchestrator::*;
