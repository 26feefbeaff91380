// src/dispatch/mod.rs
//! Event capture and delivery
//!
//! The dispatcher owns the enqueue/flush lifecycle of the durable queue:
//! synchronous enqueue on the caller's thread, an inline drain when the
//! queue crosses the flush threshold, and a periodic background flush
//! thread. Delivery is at-least-once: rows leave the queue only after a
//! confirmed 2xx from the collector.

pub mod dispatcher;

// Re-export commonly used types
pub use dispatcher::{EventDispatcher, Lifecycle};
