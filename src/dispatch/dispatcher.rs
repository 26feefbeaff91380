// src/dispatch/dispatcher.rs
//! Enqueue/flush lifecycle for the durable event queue
//!
//! State machine per flush cycle: Idle → (threshold reached OR timer fires OR
//! explicit flush) → Draining → Idle. A failed delivery leaves events queued
//! for the next cycle; the same oldest-first batch is simply re-attempted.

use crate::store::EventStore;
use crate::transport::{EventPayload, Transport};
use crate::utils::config::DispatcherConfig;
use crate::utils::errors::Result;
use crate::utils::ids;
use crate::{DEVICE_TYPE, LIB_NAME, VERSION, WINDOW_ID};
use parking_lot::{Condvar, Mutex};
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Dispatcher lifecycle, advanced exactly once at shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Background flushing is live
    Running,
    /// Shutdown has begun; the worker exits on next wake without touching
    /// collaborators
    Draining,
    /// The worker has been joined
    Stopped,
}

struct Shared {
    lifecycle: Mutex<Lifecycle>,
    wake: Condvar,
}

/// Mediator between the event store and the transport
pub struct EventDispatcher {
    store: Arc<EventStore>,
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    pub fn new(
        store: Arc<EventStore>,
        transport: Arc<dyn Transport>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(Lifecycle::Running),
                wake: Condvar::new(),
            }),
            worker: None,
        }
    }

    /// Spawn the periodic flush thread
    pub fn start(&mut self) {
        let store = Arc::clone(&self.store);
        let transport = Arc::clone(&self.transport);
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();

        let handle = std::thread::Builder::new()
            .name("event-flush".to_string())
            .spawn(move || {
                info!("Event flush thread started");
                loop {
                    {
                        let mut state = shared.lifecycle.lock();
                        if *state != Lifecycle::Running {
                            break;
                        }
                        shared.wake.wait_for(&mut state, config.flush_interval);
                        if *state != Lifecycle::Running {
                            break;
                        }
                    }

                    // One cycle; any failure is logged and the loop continues
                    match store.opt_out() {
                        Ok(true) => continue,
                        Ok(false) => {}
                        Err(e) => {
                            error!("Could not read opt-out flag: {}", e);
                            continue;
                        }
                    }
                    if let Err(e) = drain_once(&store, &transport, config.max_batch_size) {
                        error!("Periodic flush failed: {}", e);
                    }
                }
                info!("Event flush thread exiting");
            })
            .expect("failed to spawn event flush thread");

        self.worker = Some(handle);
    }

    /// Enrich, serialize and durably enqueue one event.
    ///
    /// No-op while opted out. When the queue reaches the flush threshold the
    /// drain runs inline on the calling thread before this returns.
    pub fn capture(&self, event_name: &str, properties: Option<Value>) -> Result<()> {
        if self.store.opt_out()? {
            debug!("Capture of '{}' skipped: opted out", event_name);
            return Ok(());
        }

        let distinct_id = self.store.get_or_create_distinct_id()?;
        let session_id = self.store.get_or_create_session_id()?;

        let mut props = serde_json::Map::new();
        props.insert("$lib".to_string(), json!(LIB_NAME));
        props.insert("$lib_version".to_string(), json!(VERSION));
        props.insert("$device_type".to_string(), json!(DEVICE_TYPE));
        props.insert("$os".to_string(), json!(std::env::consts::OS));
        props.insert("$session_id".to_string(), json!(session_id));
        props.insert("$window_id".to_string(), json!(WINDOW_ID));

        // Super properties reflect store state at capture time
        for (key, value) in self.store.super_properties()? {
            props.insert(key, value);
        }

        // Caller-supplied properties win over everything
        if let Some(Value::Object(caller_props)) = properties {
            for (key, value) in caller_props {
                props.insert(key, value);
            }
        }

        let payload = EventPayload::new(event_name, distinct_id, ids::epoch_ms())
            .with_properties(Value::Object(props));
        self.enqueue_payload(payload)
    }

    /// Durably enqueue a pre-built event, then drain inline if the queue has
    /// reached the flush threshold
    pub fn enqueue_payload(&self, payload: EventPayload) -> Result<()> {
        let value = serde_json::to_value(&payload)
            .map_err(|e| crate::SdkError::ParseFailed(format!("Event serialization: {}", e)))?;
        self.store.enqueue(&value)?;

        let size = self.store.size()?;
        if size >= self.config.flush_at {
            debug!("Queue at {} (threshold {}), draining inline", size, self.config.flush_at);
            if let Err(e) = self.flush() {
                // Data stays queued; the periodic thread retries
                warn!("Inline drain failed: {}", e);
            }
        }
        Ok(())
    }

    /// Run one draining cycle synchronously
    pub fn flush(&self) -> Result<()> {
        drain_once(&self.store, &self.transport, self.config.max_batch_size)
    }

    /// Flip the liveness flag so the worker exits on its next wake.
    /// Idempotent; safe to call from any thread.
    pub fn begin_shutdown(&self) {
        let mut state = self.shared.lifecycle.lock();
        if *state == Lifecycle::Running {
            *state = Lifecycle::Draining;
        }
        self.shared.wake.notify_all();
    }

    /// Reap the flush thread. Must be called after [`begin_shutdown`];
    /// collaborators may be destroyed once this returns.
    ///
    /// [`begin_shutdown`]: EventDispatcher::begin_shutdown
    pub fn join(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Event flush thread panicked");
            }
        }
        *self.shared.lifecycle.lock() = Lifecycle::Stopped;
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.shared.lifecycle.lock()
    }
}

/// One dequeue-send-remove attempt. Failure leaves every row queued.
fn drain_once(
    store: &EventStore,
    transport: &Arc<dyn Transport>,
    max_batch_size: usize,
) -> Result<()> {
    let batch = store.dequeue_batch(max_batch_size)?;
    if batch.is_empty() {
        return Ok(());
    }

    let mut ids = Vec::with_capacity(batch.len());
    let mut events = Vec::with_capacity(batch.len());
    for event in batch {
        ids.push(event.id);
        events.push(event.payload);
    }

    let response = transport.post_capture(&events);
    if response.success {
        store.remove(&ids)?;
        debug!("Delivered {} events", ids.len());
    } else {
        warn!(
            "Delivery of {} events failed (HTTP {}), leaving them queued",
            ids.len(),
            response.status
        );
    }
    Ok(())
}
