// src/utils/errors.rs
//! SDK error types
//!
//! No error from the capture pipeline is ever allowed to take down the host
//! application: callers log and degrade, background loops log and continue.

use thiserror::Error;

/// Errors surfaced by the SDK
#[derive(Error, Debug)]
pub enum SdkError {
    /// Setup could not complete; the client stays uninitialized
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// A single store operation failed; queued data is retained
    #[error("Storage operation failed: {0}")]
    StorageFailed(String),

    /// The durable queue is at capacity; the event was not enqueued
    #[error("Event queue is full")]
    QueueFull,

    /// Network-level delivery failure
    #[error("Transport failed: {0}")]
    TransportFailed(String),

    /// Malformed JSON in a response or stored blob
    #[error("Parse failed: {0}")]
    ParseFailed(String),
}

/// SDK result type
pub type Result<T> = std::result::Result<T, SdkError>;
