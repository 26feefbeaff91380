// src/utils/config.rs
//! Client configuration
//!
//! Plain data structs with defaults matching the collector's documented
//! client behavior. All knobs are set once at setup; nothing here is global
//! mutable state.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Project API key (required, non-empty)
    pub api_key: String,

    /// Collector base URL
    pub host: String,

    /// Queue length that triggers an inline drain on the capture path
    pub flush_at: usize,

    /// Durable queue capacity; enqueues fail once this is reached
    pub max_queue_size: usize,

    /// Maximum events per delivery attempt
    pub max_batch_size: usize,

    /// Periodic background flush interval
    pub flush_interval: Duration,

    /// Verbose logging (errors are emitted regardless)
    pub debug: bool,

    /// Start opted out of capture
    pub opt_out: bool,

    /// Fetch feature flags during setup
    pub preload_feature_flags: bool,

    /// Enable the session replay pipeline
    pub session_replay: bool,

    /// Session replay tuning
    pub replay: ReplayConfig,

    /// Override for the on-disk data directory (defaults to the platform
    /// data dir)
    pub data_dir: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            host: "https://us.i.posthog.com".to_string(),
            flush_at: 20,
            max_queue_size: 1000,
            max_batch_size: 50,
            flush_interval: Duration::from_secs(30),
            debug: false,
            opt_out: false,
            preload_feature_flags: true,
            session_replay: false,
            replay: ReplayConfig::default(),
            data_dir: None,
        }
    }
}

/// Event dispatcher configuration, derived from [`ClientConfig`]
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Queue length that triggers an inline drain after enqueue
    pub flush_at: usize,

    /// Maximum events per delivery attempt
    pub max_batch_size: usize,

    /// Background flush interval
    pub flush_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            flush_at: 20,
            max_batch_size: 50,
            flush_interval: Duration::from_secs(30),
        }
    }
}

impl From<&ClientConfig> for DispatcherConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            flush_at: config.flush_at,
            max_batch_size: config.max_batch_size,
            flush_interval: config.flush_interval,
        }
    }
}

/// Session replay pipeline configuration
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// JPEG quality, 0-100
    pub compression_quality: u8,

    /// Snapshot count that triggers a send on the next poll
    pub batch_size: usize,

    /// Maximum time between sends while the buffer is non-empty
    pub batch_interval: Duration,

    /// Poll interval of the replay flush thread
    pub poll_interval: Duration,

    /// Uniform downscale bound; `None` disables resizing
    pub max_image_dimension: Option<u32>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            compression_quality: 75,
            batch_size: 10,
            batch_interval: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(100),
            max_image_dimension: None,
        }
    }
}
