// src/replay/mod.rs
//! Session replay capture
//!
//! Buffers visual snapshots and scene metadata in memory, compresses frames
//! to JPEG, and ships batches to the collector from an independent background
//! thread with size- and time-based triggers. Unlike the durable event queue,
//! unsent replay buffers are lost on teardown; that loss is accepted.

pub mod encoder;
pub mod pipeline;

// Re-export commonly used types
pub use encoder::{EncodedImage, SnapshotEncoder};
pub use pipeline::{MetaEvent, SessionReplayPipeline, Snapshot};
