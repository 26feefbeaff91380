// src/lib.rs
//! Signalpost Telemetry Client Library
//!
//! An embeddable client for a PostHog-compatible collector: durable event
//! capture with batched background delivery, feature flag evaluation with a
//! persistent cache, and an optional session replay pipeline.
//!
//! # Architecture
//!
//! The client is structured into several key modules:
//!
//! - **client**: Public facade owning setup, capture surface and shutdown
//! - **dispatch**: Durable queue draining and periodic background flushing
//! - **store**: SQLite-backed event queue, settings and super properties
//! - **transport**: Blocking HTTP delivery to the collector endpoints
//! - **flags**: Feature flag cache with cold-start persistence
//! - **replay**: Snapshot compression, buffering and batch delivery
//! - **utils**: Configuration, errors, identifiers, logging

// Public module exports
pub mod client;
pub mod dispatch;
pub mod flags;
pub mod replay;
pub mod store;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use client::TelemetryClient;
pub use transport::{HttpTransport, Transport};
pub use utils::config::{ClientConfig, ReplayConfig};
pub use utils::errors::{Result, SdkError};

// Identification stamped onto every outgoing event
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const LIB_NAME: &str = env!("CARGO_PKG_NAME");
pub const DEVICE_TYPE: &str = "Mobile";
pub const WINDOW_ID: &str = "main";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(LIB_NAME, "signalpost");
    }
}
