// src/client.rs
//! Public client facade
//!
//! Owns every subsystem and encodes the teardown order that keeps shutdown
//! safe: the dispatcher is told to stop first, then the replay pipeline is
//! deactivated, drained and joined, then the dispatcher thread is joined,
//! and only then do the store and transport drop.
//!
//! Capture-path methods are fire-and-forget: failures are logged, never
//! surfaced to the caller.

use crate::dispatch::{EventDispatcher, Lifecycle};
use crate::flags::FeatureFlagCache;
use crate::replay::SessionReplayPipeline;
use crate::store::EventStore;
use crate::transport::{HttpTransport, Transport};
use crate::utils::config::ClientConfig;
use crate::utils::errors::{Result, SdkError};
use crate::utils::{ids, logging};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// The assembled client: durable event capture, feature flags and optional
/// session replay behind one handle.
///
/// Cheap queries run on the caller's thread; network delivery happens on the
/// background flush threads. Dropping the client runs [`shutdown`].
///
/// [`shutdown`]: TelemetryClient::shutdown
pub struct TelemetryClient {
    store: Arc<EventStore>,
    dispatcher: EventDispatcher,
    flags: FeatureFlagCache,
    replay: Option<SessionReplayPipeline>,
}

impl TelemetryClient {
    /// Initialize every subsystem and start the background threads.
    ///
    /// Fails only on unusable configuration or an unopenable store; network
    /// problems never fail setup.
    pub fn setup(config: ClientConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(SdkError::InitFailed("api_key must not be empty".to_string()));
        }
        let transport: Arc<dyn Transport> =
            Arc::new(HttpTransport::new(&config.host, &config.api_key)?);
        Self::setup_with_transport(config, transport)
    }

    /// [`setup`] with a caller-supplied transport. Embedders use this to
    /// route delivery through their own stack; tests use it to observe
    /// traffic without a network.
    ///
    /// [`setup`]: TelemetryClient::setup
    pub fn setup_with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(SdkError::InitFailed("api_key must not be empty".to_string()));
        }
        logging::init(config.debug);

        let data_dir = config
            .data_dir
            .clone()
            .unwrap_or_else(ids::default_data_dir);
        let store = Arc::new(EventStore::open(&data_dir, config.max_queue_size)?);

        store.set_opt_out(config.opt_out)?;
        let distinct_id = store.get_or_create_distinct_id()?;
        // Every setup begins a fresh session
        store.set_session_id(&ids::new_uuid())?;

        let flags = FeatureFlagCache::new(Arc::clone(&transport), Arc::clone(&store));
        if config.preload_feature_flags && !config.opt_out {
            if let Err(e) = flags.reload(&distinct_id, None) {
                warn!("Feature flag preload failed: {}", e);
            }
        }

        let mut dispatcher = EventDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            (&config).into(),
        );
        dispatcher.start();

        let replay = if config.session_replay {
            let mut pipeline = SessionReplayPipeline::new(
                Arc::clone(&store),
                Arc::clone(&transport),
                config.replay.clone(),
            );
            pipeline.set_active(true);
            pipeline.start();
            Some(pipeline)
        } else {
            None
        };

        let client = Self {
            store,
            dispatcher,
            flags,
            replay,
        };

        // Bootstrap event marking the start of the new session
        client.capture("$screen", Some(json!({"$screen_name": "App Started"})));
        info!("Client setup complete");
        Ok(client)
    }

    // Event capture.

    /// Enqueue a named event with optional properties
    pub fn capture(&self, event: &str, properties: Option<Value>) {
        if let Err(e) = self.dispatcher.capture(event, properties) {
            warn!("Capture of '{}' failed: {}", event, e);
        }
    }

    /// Record a screen view as a `$screen` event
    pub fn screen(&self, screen_name: &str, properties: Option<Value>) {
        let mut props = match properties {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        props.insert("$screen_name".to_string(), json!(screen_name));
        self.capture("$screen", Some(Value::Object(props)));
    }

    /// Bind all subsequent events to `user_id` and emit an `$identify` event
    pub fn identify(&self, user_id: &str, properties: Option<Value>) {
        if user_id.is_empty() {
            warn!("Ignoring identify with empty user id");
            return;
        }
        if let Err(e) = self.store.set_distinct_id(user_id) {
            warn!("Identify failed: {}", e);
            return;
        }
        self.capture("$identify", properties);
    }

    /// Link the current identity to `alias` and switch to it
    pub fn alias(&self, alias: &str) {
        if alias.is_empty() {
            warn!("Ignoring empty alias");
            return;
        }
        let old_id = match self.store.get_or_create_distinct_id() {
            Ok(id) => id,
            Err(e) => {
                warn!("Alias failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set_distinct_id(alias) {
            warn!("Alias failed: {}", e);
            return;
        }
        // The event carries the new identity; `alias` points back at the old
        self.capture("$create_alias", Some(json!({"alias": old_id})));
    }

    /// Associate the current identity with a group
    pub fn group(&self, group_type: &str, group_key: &str) {
        self.capture(
            "$groupidentify",
            Some(json!({"$group_type": group_type, "$group_key": group_key})),
        );
    }

    /// Record an `$exception` event
    pub fn capture_exception(&self, properties: Option<Value>) {
        self.capture("$exception", properties);
    }

    /// Run one delivery cycle synchronously
    pub fn flush(&self) {
        if let Err(e) = self.dispatcher.flush() {
            warn!("Flush failed: {}", e);
        }
    }

    /// Drop the current identity: new random distinct id, super properties
    /// cleared. Queued events are unaffected.
    pub fn reset(&self) {
        if let Err(e) = self.store.set_distinct_id(&ids::new_uuid()) {
            warn!("Reset failed: {}", e);
            return;
        }
        if let Err(e) = self.store.clear_super_properties() {
            warn!("Clearing super properties failed: {}", e);
        }
    }

    // Super properties.

    /// Attach `key: value` to every future captured event
    pub fn register_super_property(&self, key: &str, value: Value) {
        if let Err(e) = self.store.set_super_property(key, &value) {
            warn!("Registering super property '{}' failed: {}", key, e);
        }
    }

    pub fn unregister_super_property(&self, key: &str) {
        if let Err(e) = self.store.remove_super_property(key) {
            warn!("Unregistering super property '{}' failed: {}", key, e);
        }
    }

    // Opt-out.

    pub fn opt_in(&self) {
        if let Err(e) = self.store.set_opt_out(false) {
            warn!("Opt-in failed: {}", e);
        }
    }

    pub fn opt_out(&self) {
        if let Err(e) = self.store.set_opt_out(true) {
            warn!("Opt-out failed: {}", e);
        }
    }

    pub fn is_opted_out(&self) -> bool {
        self.store.opt_out().unwrap_or(false)
    }

    // Feature flags.

    pub fn is_feature_enabled(&self, key: &str) -> bool {
        self.flags.is_enabled(key)
    }

    pub fn feature_flag(&self, key: &str) -> Option<String> {
        self.flags.flag_value(key)
    }

    pub fn feature_flag_payload(&self, key: &str) -> Option<String> {
        self.flags.flag_payload(key)
    }

    /// Refresh the flag cache from the collector, synchronously
    pub fn reload_feature_flags(&self) {
        if self.is_opted_out() {
            return;
        }
        let distinct_id = match self.store.get_or_create_distinct_id() {
            Ok(id) => id,
            Err(e) => {
                warn!("Flag reload skipped: {}", e);
                return;
            }
        };
        if let Err(e) = self.flags.reload(&distinct_id, None) {
            warn!("Flag reload failed: {}", e);
        }
    }

    // Identity.

    /// Current distinct id, created and persisted on first use
    pub fn distinct_id(&self) -> String {
        match self.store.get_or_create_distinct_id() {
            Ok(id) => id,
            Err(e) => {
                warn!("Falling back to generated distinct id: {}", e);
                ids::fallback_distinct_id()
            }
        }
    }

    /// Current session id, created and persisted on first use
    pub fn session_id(&self) -> String {
        match self.store.get_or_create_session_id() {
            Ok(id) => id,
            Err(e) => {
                warn!("Falling back to generated session id: {}", e);
                ids::fallback_session_id()
            }
        }
    }

    /// Rotate the session id and emit a session-start event
    pub fn create_new_session(&self) {
        let session_id = ids::new_uuid();
        if let Err(e) = self.store.set_session_id(&session_id) {
            warn!("Session rotation failed: {}", e);
            return;
        }
        self.capture("$screen", Some(json!({"$screen_name": "Session Started"})));
        info!("New session {}", session_id);
    }

    // Session replay.

    /// Feed one raw frame into the replay pipeline. No-op when replay is
    /// disabled or inactive.
    pub fn send_full_snapshot(
        &self,
        image_bytes: &[u8],
        wireframe_id: i64,
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    ) {
        if let Some(replay) = &self.replay {
            replay.add_snapshot(image_bytes, wireframe_id, x, y, width, height);
        }
    }

    /// Announce viewport and screen context for subsequent snapshots
    pub fn send_meta_event(&self, width: u32, height: u32, screen: &str) {
        if let Some(replay) = &self.replay {
            replay.add_meta_event(width, height, screen);
        }
    }

    pub fn is_session_replay_active(&self) -> bool {
        self.replay.as_ref().map(|r| r.is_active()).unwrap_or(false)
    }

    /// Stop both background threads and drain what can still be drained.
    ///
    /// Order matters: the dispatcher is signalled before the replay pipeline
    /// is deactivated and joined, the dispatcher thread is joined last, and
    /// the store and transport outlive both joins. Idempotent.
    pub fn shutdown(&mut self) {
        if self.dispatcher.lifecycle() == Lifecycle::Stopped {
            return;
        }
        info!("Client shutting down");

        self.dispatcher.begin_shutdown();

        if let Some(replay) = self.replay.as_mut() {
            replay.set_active(false);
            replay.flush();
            replay.stop();
        }

        // Best-effort final drain; anything left stays durably queued
        if let Err(e) = self.dispatcher.flush() {
            warn!("Final drain failed: {}", e);
        }
        self.dispatcher.join();
        info!("Client shut down");
    }
}

impl Drop for TelemetryClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpResponse;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct NullTransport {
        capture_calls: AtomicUsize,
        decide_calls: AtomicUsize,
        captured: Mutex<Vec<Value>>,
    }

    impl NullTransport {
        fn new() -> Self {
            Self {
                capture_calls: AtomicUsize::new(0),
                decide_calls: AtomicUsize::new(0),
                captured: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for NullTransport {
        fn post_capture(&self, events: &[Value]) -> HttpResponse {
            self.capture_calls.fetch_add(1, Ordering::SeqCst);
            self.captured.lock().extend(events.iter().cloned());
            HttpResponse {
                success: true,
                status: 200,
                body: "ok".to_string(),
            }
        }

        fn post_decide(&self, _distinct_id: &str, _properties: Option<&Value>) -> HttpResponse {
            self.decide_calls.fetch_add(1, Ordering::SeqCst);
            HttpResponse {
                success: true,
                status: 200,
                body: r#"{"featureFlags":{"beta":true}}"#.to_string(),
            }
        }

        fn post_replay(&self, _records: &[Value]) -> HttpResponse {
            HttpResponse {
                success: true,
                status: 200,
                body: "ok".to_string(),
            }
        }
    }

    fn client_in(dir: &std::path::Path, transport: Arc<NullTransport>) -> TelemetryClient {
        let mut config = ClientConfig::new("test-key");
        config.data_dir = Some(dir.to_path_buf());
        config.flush_at = 100;
        TelemetryClient::setup_with_transport(config, transport as Arc<dyn Transport>).unwrap()
    }

    #[test]
    fn test_setup_rejects_empty_api_key() {
        let result = TelemetryClient::setup(ClientConfig::default());
        assert!(matches!(result, Err(SdkError::InitFailed(_))));
    }

    #[test]
    fn test_setup_preloads_flags_and_bootstraps() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(NullTransport::new());
        let mut client = client_in(dir.path(), Arc::clone(&transport));

        assert_eq!(transport.decide_calls.load(Ordering::SeqCst), 1);
        assert!(client.is_feature_enabled("beta"));

        client.flush();
        let captured = transport.captured.lock();
        let bootstrap = captured
            .iter()
            .find(|e| e["properties"]["$screen_name"] == "App Started")
            .unwrap();
        assert_eq!(bootstrap["event"], "$screen");
        assert_eq!(bootstrap["properties"]["$device_type"], "Mobile");
        drop(captured);
        client.shutdown();
    }

    #[test]
    fn test_identify_switches_distinct_id() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(NullTransport::new());
        let mut client = client_in(dir.path(), Arc::clone(&transport));

        client.identify("user-42", Some(json!({"email": "u@example.com"})));
        assert_eq!(client.distinct_id(), "user-42");

        client.capture("later", None);
        client.flush();
        let captured = transport.captured.lock();
        let identify = captured.iter().find(|e| e["event"] == "$identify").unwrap();
        assert_eq!(identify["distinct_id"], "user-42");
        assert_eq!(identify["properties"]["email"], "u@example.com");
        let later = captured.iter().find(|e| e["event"] == "later").unwrap();
        assert_eq!(later["distinct_id"], "user-42");
        drop(captured);
        client.shutdown();
    }

    #[test]
    fn test_alias_links_old_identity() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(NullTransport::new());
        let mut client = client_in(dir.path(), Arc::clone(&transport));

        let old_id = client.distinct_id();
        client.alias("new-identity");
        assert_eq!(client.distinct_id(), "new-identity");

        client.flush();
        let captured = transport.captured.lock();
        let alias = captured
            .iter()
            .find(|e| e["event"] == "$create_alias")
            .unwrap();
        assert_eq!(alias["distinct_id"], "new-identity");
        assert_eq!(alias["properties"]["alias"], old_id.as_str());
        drop(captured);
        client.shutdown();
    }

    #[test]
    fn test_reset_rotates_identity_and_clears_super_properties() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(NullTransport::new());
        let mut client = client_in(dir.path(), Arc::clone(&transport));

        client.register_super_property("plan", json!("pro"));
        let before = client.distinct_id();
        client.reset();
        let after = client.distinct_id();
        assert_ne!(before, after);

        client.capture("afterwards", None);
        client.flush();
        let captured = transport.captured.lock();
        let event = captured.iter().find(|e| e["event"] == "afterwards").unwrap();
        assert!(event["properties"].get("plan").is_none());
        drop(captured);
        client.shutdown();
    }

    #[test]
    fn test_opt_out_round_trip() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(NullTransport::new());
        let mut client = client_in(dir.path(), Arc::clone(&transport));

        assert!(!client.is_opted_out());
        client.opt_out();
        assert!(client.is_opted_out());

        client.capture("suppressed", None);
        client.flush();
        assert!(!transport
            .captured
            .lock()
            .iter()
            .any(|e| e["event"] == "suppressed"));

        client.opt_in();
        assert!(!client.is_opted_out());
        client.shutdown();
    }

    #[test]
    fn test_session_rotation() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(NullTransport::new());
        let mut client = client_in(dir.path(), Arc::clone(&transport));

        let first = client.session_id();
        client.create_new_session();
        let second = client.session_id();
        assert_ne!(first, second);
        client.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent_and_drop_safe() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(NullTransport::new());
        let mut client = client_in(dir.path(), Arc::clone(&transport));

        client.capture("queued", None);
        client.shutdown();
        client.shutdown();
        // Drop runs shutdown again; must not deadlock or panic
        drop(client);
    }

    #[test]
    fn test_replay_disabled_by_default() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(NullTransport::new());
        let client = client_in(dir.path(), transport);

        assert!(!client.is_session_replay_active());
        // No-ops without a pipeline
        client.send_full_snapshot(b"bytes", 1, 0, 0, 10, 10);
        client.send_meta_event(100, 100, "home");
    }
}
