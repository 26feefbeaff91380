// src/flags/mod.rs
//! Feature flag cache
//!
//! In-memory flag map refreshed over the transport's decide endpoint and
//! persisted through the event store so flags are available (possibly stale)
//! immediately after a cold start.

pub mod cache;

// Re-export commonly used types
pub use cache::FeatureFlagCache;
