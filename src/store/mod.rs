// src/store/mod.rs
//! Durable on-device storage
//!
//! One embedded SQLite database per data directory holding:
//!
//! - **events**: the durable append-only delivery queue
//! - **settings**: identity, session, opt-out, cached feature flags
//! - **super_properties**: key/value pairs merged into every captured event
//!
//! All access is serialized by a single mutex; the store supports at most one
//! in-flight operation and callers block.

pub mod event_store;

// Re-export commonly used types
pub use event_store::{EventStore, QueuedEvent};
