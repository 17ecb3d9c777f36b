//! Tracehound Probe Layer
//!
//! Everything between a probe request and its result:
//! - **Cache**: bounded LRU memory tier over a persistent store, with single-flight
//! - **Checkers**: status-code and pattern strategies with sentinel calibration
//! - **Plugins**: registered checker builders consulted before the built-ins
//! - **Extraction**: profile metadata pulled from found pages

pub mod cache;
pub mod checker;
pub mod extract;
pub mod lru;
pub mod pattern;
pub mod plugins;
pub mod singleflight;
pub mod status;
pub mod store;

pub use cache::*;
pub use checker::*;
pub use extract::*;
pub use lru::LruCache;
pub use pattern::*;
pub use plugins::*;
pub use singleflight::SingleFlight;
pub use status::*;
pub use store::*;
