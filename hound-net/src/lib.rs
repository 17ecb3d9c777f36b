//! Tracehound Network Layer
//!
//! The single external-call primitive of the engine:
//! - Per-target token-bucket rate limiting
//! - Retrying fetcher with exponential backoff and Retry-After handling
//! - A `Transport` seam: reqwest-backed client, scripted transport for tests

pub mod fetcher;
pub mod limiter;
pub mod mock;
pub mod transport;

pub use fetcher::*;
pub use limiter::*;
pub use transport::*;
