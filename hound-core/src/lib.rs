//! Tracehound Core - probe and profile domain model
//!
//! This crate provides the foundational primitives:
//! - Platform records and the read-only platform registry
//! - Probe requests and their cache fingerprints
//! - Profile results, cache entries and indeterminate outcomes
//! - Lifecycle events and the injected event sink
//! - The probe error taxonomy

pub mod error;
pub mod events;
pub mod identifier;
pub mod platform;
pub mod probe;
pub mod profile;
pub mod registry;

pub use error::*;
pub use events::*;
pub use identifier::*;
pub use platform::*;
pub use probe::*;
pub use profile::*;
pub use registry::*;

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of fetch attempts per probe
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default global cap on concurrently running probes
pub const DEFAULT_CONCURRENCY: usize = 100;

/// Default overall batch timeout in seconds
pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 120;

/// Default L1 (memory) cache capacity
pub const DEFAULT_L1_CAPACITY: usize = 1000;

/// Default L1 entry TTL in seconds (1h)
pub const DEFAULT_L1_TTL_SECS: u64 = 3600;

/// Default L2 (persistent) entry TTL in seconds (24h)
pub const DEFAULT_L2_TTL_SECS: u64 = 86_400;

/// Longest TTL a cache tier accepts in config (10 years)
pub const MAX_CACHE_TTL_SECS: u64 = 10 * 365 * 86_400;
