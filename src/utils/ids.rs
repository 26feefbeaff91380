// src/utils/ids.rs
//! Identifier and timestamp helpers

use rand::Rng;
use std::path::PathBuf;
use uuid::Uuid;

/// Generate a random UUIDv4 string
pub fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Fallback distinct id when the store is unavailable or empty.
///
/// Format: `<epoch-ms>-<4 digit random>`, matching what other clients of the
/// collector generate in the same situation.
pub fn fallback_distinct_id() -> String {
    let random: u32 = rand::thread_rng().gen_range(1000..10000);
    format!("{}-{}", epoch_ms(), random)
}

/// Fallback session id when none was established at setup
pub fn fallback_session_id() -> String {
    format!("session_{}", epoch_ms())
}

/// Default on-disk data directory for the client's SQLite store
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("signalpost")
}
