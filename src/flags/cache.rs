// src/flags/cache.rs
//! In-memory feature flag map with persistent cold-start cache
//!
//! Flag lookups are synchronous and never fail: an unknown or malformed flag
//! reads as absent. A malformed decide response leaves the cached flags
//! unchanged.

use crate::store::EventStore;
use crate::transport::payload::DecideResponse;
use crate::transport::Transport;
use crate::utils::errors::{Result, SdkError};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Flag key to value map, consulted synchronously by capture-path callers
pub struct FeatureFlagCache {
    transport: Arc<dyn Transport>,
    store: Arc<EventStore>,
    flags: Mutex<serde_json::Map<String, Value>>,
}

impl FeatureFlagCache {
    /// Build the cache and load the last persisted flags blob, so flags are
    /// usable before any network call
    pub fn new(transport: Arc<dyn Transport>, store: Arc<EventStore>) -> Self {
        let cache = Self {
            transport,
            store,
            flags: Mutex::new(serde_json::Map::new()),
        };
        cache.load_persisted();
        cache
    }

    fn load_persisted(&self) {
        let blob = match self.store.feature_flags() {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Could not read persisted feature flags: {}", e);
                return;
            }
        };
        if blob == "{}" {
            return;
        }
        if let Err(e) = self.apply_response(&blob) {
            warn!("Ignoring unparseable persisted feature flags: {}", e);
        }
    }

    /// Parse a decide-shaped response body and replace the in-memory map.
    /// The cache is only touched when parsing succeeds.
    fn apply_response(&self, body: &str) -> Result<()> {
        let response: DecideResponse = serde_json::from_str(body)
            .map_err(|e| SdkError::ParseFailed(format!("Invalid flags response: {}", e)))?;

        let mut flags = self.flags.lock();
        *flags = response.feature_flags;
        debug!("Loaded {} feature flags", flags.len());
        Ok(())
    }

    /// Refresh flags from the collector and persist the raw response for the
    /// next cold start
    pub fn reload(&self, distinct_id: &str, properties: Option<&Value>) -> Result<()> {
        let response = self.transport.post_decide(distinct_id, properties);
        if !response.success || response.body.is_empty() {
            return Err(SdkError::TransportFailed(format!(
                "Flag reload failed with HTTP {}",
                response.status
            )));
        }

        self.apply_response(&response.body)?;

        if let Err(e) = self.store.set_feature_flags(&response.body) {
            warn!("Could not persist feature flags: {}", e);
        }
        Ok(())
    }

    /// True iff the cached value is a recognized truthy encoding: boolean
    /// `true`, the number `1`, or a non-empty string. Any other value reads
    /// as disabled; a missing key is false, never an error.
    pub fn is_enabled(&self, key: &str) -> bool {
        let flags = self.flags.lock();
        match flags.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Number(n)) => n.as_f64() == Some(1.0),
            _ => false,
        }
    }

    /// The unwrapped cached value, if any
    pub fn flag_value(&self, key: &str) -> Option<String> {
        let flags = self.flags.lock();
        flags.get(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Flag payloads are not supported by this client; always `None`
    pub fn flag_payload(&self, _key: &str) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpResponse;
    use serde_json::json;
    use tempfile::tempdir;

    struct StubDecide {
        body: String,
        success: bool,
    }

    impl Transport for StubDecide {
        fn post_capture(&self, _events: &[Value]) -> HttpResponse {
            HttpResponse::default()
        }

        fn post_decide(&self, _distinct_id: &str, _properties: Option<&Value>) -> HttpResponse {
            HttpResponse {
                success: self.success,
                status: if self.success { 200 } else { 500 },
                body: self.body.clone(),
            }
        }

        fn post_replay(&self, _records: &[Value]) -> HttpResponse {
            HttpResponse::default()
        }
    }

    fn store_in(dir: &std::path::Path) -> Arc<EventStore> {
        Arc::new(EventStore::open(dir, 100).unwrap())
    }

    #[test]
    fn test_reload_and_lookup() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let transport = Arc::new(StubDecide {
            body: r#"{"featureFlags":{"beta":true,"off":false,"variant":"blue","count":1}}"#
                .to_string(),
            success: true,
        });

        let cache = FeatureFlagCache::new(transport, store);
        cache.reload("user-1", None).unwrap();

        assert!(cache.is_enabled("beta"));
        assert!(!cache.is_enabled("off"));
        assert!(cache.is_enabled("variant"));
        assert!(cache.is_enabled("count"));
        assert!(!cache.is_enabled("missing"));

        assert_eq!(cache.flag_value("variant").as_deref(), Some("blue"));
        assert_eq!(cache.flag_value("beta").as_deref(), Some("true"));
        assert_eq!(cache.flag_value("missing"), None);
        assert_eq!(cache.flag_payload("variant"), None);
    }

    #[test]
    fn test_only_one_is_a_truthy_number() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let transport = Arc::new(StubDecide {
            body: r#"{"featureFlags":{"one":1,"two":2,"zero":0,"neg":-1,"frac":0.5}}"#.to_string(),
            success: true,
        });

        let cache = FeatureFlagCache::new(transport, store);
        cache.reload("user-1", None).unwrap();

        // Numeric flags are enabled only for exactly 1
        assert!(cache.is_enabled("one"));
        assert!(!cache.is_enabled("two"));
        assert!(!cache.is_enabled("zero"));
        assert!(!cache.is_enabled("neg"));
        assert!(!cache.is_enabled("frac"));
    }

    #[test]
    fn test_malformed_response_leaves_cache_unchanged() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .set_feature_flags(r#"{"featureFlags":{"beta":true}}"#)
            .unwrap();

        let transport = Arc::new(StubDecide {
            body: "not json".to_string(),
            success: true,
        });
        let cache = FeatureFlagCache::new(transport, store);
        assert!(cache.is_enabled("beta"));

        let result = cache.reload("user-1", None);
        assert!(result.is_err());
        // Previous flags survive the bad reload
        assert!(cache.is_enabled("beta"));
    }

    #[test]
    fn test_cold_start_uses_persisted_flags() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .set_feature_flags(r#"{"featureFlags":{"cached":"yes"}}"#)
            .unwrap();

        let transport = Arc::new(StubDecide {
            body: String::new(),
            success: false,
        });
        let cache = FeatureFlagCache::new(transport, store);

        // No network call has succeeded, yet the flag is visible
        assert!(cache.is_enabled("cached"));
        assert!(cache.reload("user-1", None).is_err());
        assert!(cache.is_enabled("cached"));
    }

    #[test]
    fn test_reload_persists_raw_response() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let transport = Arc::new(StubDecide {
            body: r#"{"featureFlags":{"k":"v"}}"#.to_string(),
            success: true,
        });

        let cache = FeatureFlagCache::new(transport, Arc::clone(&store));
        cache.reload("user-1", Some(&json!({"plan": "pro"}))).unwrap();

        assert!(store.feature_flags().unwrap().contains("\"k\""));
    }
}
