// src/utils/mod.rs
//! Common utilities and helpers

pub mod config;
pub mod errors;
pub mod ids;
pub mod logging;

// Re-export commonly used types
pub use config::{ClientConfig, DispatcherConfig, ReplayConfig};
pub use errors::{Result, SdkError};
