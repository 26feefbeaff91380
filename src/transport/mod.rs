// src/transport/mod.rs
//! Collector HTTP transport
//!
//! Stateless-per-call POST wrapper around one reusable blocking HTTP client.
//! The client handle is serialized by a mutex: at most one network call is in
//! flight process-wide, trading throughput for simplicity and resource
//! economy. The transport never retries; retry policy belongs to callers.

pub mod client;
pub mod payload;

// Re-export commonly used types
pub use client::{HttpResponse, HttpTransport, Transport};
pub use payload::EventPayload;
