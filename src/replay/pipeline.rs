// src/replay/pipeline.rs
//! Replay buffering and batch delivery
//!
//! Snapshots and meta events accumulate in memory behind a mutex. A
//! dedicated thread polls the buffers and sends a batch when either the
//! size threshold is reached or the batch interval has elapsed with work
//! pending. Failed batches are dropped, never retried.

use crate::replay::encoder::SnapshotEncoder;
use crate::store::EventStore;
use crate::transport::Transport;
use crate::utils::config::ReplayConfig;
use crate::utils::ids;
use crate::{DEVICE_TYPE, LIB_NAME, VERSION, WINDOW_ID};
use parking_lot::{Condvar, Mutex};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A compressed frame waiting in the outgoing buffer
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Stable identifier for the captured surface
    pub wireframe_id: i64,
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
    /// Base64 JPEG produced by the encoder
    pub image_base64: String,
    /// Capture time, epoch milliseconds
    pub timestamp: i64,
}

/// A scene-description event announcing viewport and screen name
#[derive(Debug, Clone)]
pub struct MetaEvent {
    pub width: u32,
    pub height: u32,
    pub screen: String,
    pub timestamp: i64,
}

struct Buffers {
    snapshots: Vec<Snapshot>,
    metas: Vec<MetaEvent>,
    last_batch: Instant,
}

struct Shared {
    store: Arc<EventStore>,
    transport: Arc<dyn Transport>,
    config: ReplayConfig,
    buffers: Mutex<Buffers>,
    wake: Condvar,
    /// Recording toggle; when false, incoming frames are dropped
    active: AtomicBool,
    /// Worker liveness; cleared exactly once at teardown
    running: AtomicBool,
    /// Whether a meta event has been emitted for the current recording span
    meta_sent: AtomicBool,
}

/// Independent snapshot delivery pipeline.
///
/// Runs its own flush thread with its own triggers; completely decoupled
/// from the event dispatcher's queue and timing.
pub struct SessionReplayPipeline {
    shared: Arc<Shared>,
    encoder: SnapshotEncoder,
    worker: Option<JoinHandle<()>>,
}

impl SessionReplayPipeline {
    pub fn new(
        store: Arc<EventStore>,
        transport: Arc<dyn Transport>,
        config: ReplayConfig,
    ) -> Self {
        let encoder = SnapshotEncoder::new(config.compression_quality, config.max_image_dimension);
        Self {
            shared: Arc::new(Shared {
                store,
                transport,
                config,
                buffers: Mutex::new(Buffers {
                    snapshots: Vec::new(),
                    metas: Vec::new(),
                    last_batch: Instant::now(),
                }),
                wake: Condvar::new(),
                active: AtomicBool::new(false),
                running: AtomicBool::new(true),
                meta_sent: AtomicBool::new(false),
            }),
            encoder,
            worker: None,
        }
    }

    /// Spawn the replay flush thread
    pub fn start(&mut self) {
        let shared = Arc::clone(&self.shared);

        let handle = std::thread::Builder::new()
            .name("replay-flush".to_string())
            .spawn(move || {
                info!("Replay flush thread started");
                loop {
                    let pending;
                    {
                        let mut buffers = shared.buffers.lock();
                        shared
                            .wake
                            .wait_for(&mut buffers, shared.config.poll_interval);
                        if !shared.running.load(Ordering::SeqCst) {
                            break;
                        }
                        if !shared.active.load(Ordering::SeqCst) {
                            continue;
                        }

                        let due = buffers.snapshots.len() >= shared.config.batch_size
                            || (!buffers.snapshots.is_empty()
                                && buffers.last_batch.elapsed() >= shared.config.batch_interval);
                        if !due {
                            continue;
                        }

                        pending = take_buffers(&mut buffers);
                    }
                    // Network I/O happens outside the lock
                    send_batch(&shared, pending.0, pending.1);
                }
                info!("Replay flush thread exiting");
            })
            .expect("failed to spawn replay flush thread");

        self.worker = Some(handle);
    }

    /// Compress one raw frame and append it to the outgoing buffer.
    /// Dropped silently while recording is inactive.
    pub fn add_snapshot(
        &self,
        raw_image: &[u8],
        wireframe_id: i64,
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    ) {
        if !self.shared.active.load(Ordering::SeqCst) {
            debug!("Snapshot dropped: replay inactive");
            return;
        }

        // Encode before taking the lock; compression dominates the cost
        let encoded = self.encoder.encode(raw_image, width, height);
        let snapshot = Snapshot {
            wireframe_id,
            x,
            y,
            width: encoded.width,
            height: encoded.height,
            image_base64: encoded.base64,
            timestamp: ids::epoch_ms(),
        };

        let mut buffers = self.shared.buffers.lock();
        buffers.snapshots.push(snapshot);
        debug!("Replay buffer at {} snapshots", buffers.snapshots.len());
    }

    /// Buffer a scene-description event for the current recording span.
    /// Dropped silently while recording is inactive.
    pub fn add_meta_event(&self, width: u32, height: u32, screen: &str) {
        if !self.shared.active.load(Ordering::SeqCst) {
            debug!("Meta event dropped: replay inactive");
            return;
        }

        let meta = MetaEvent {
            width,
            height,
            screen: screen.to_string(),
            timestamp: ids::epoch_ms(),
        };
        self.shared.buffers.lock().metas.push(meta);
        self.shared.meta_sent.store(true, Ordering::SeqCst);
    }

    /// Send everything buffered right now, synchronously on this thread
    pub fn flush(&self) {
        let pending = {
            let mut buffers = self.shared.buffers.lock();
            take_buffers(&mut buffers)
        };
        send_batch(&self.shared, pending.0, pending.1);
    }

    /// Toggle recording. Activation begins a new span, so the next meta
    /// event is treated as the first of the span.
    pub fn set_active(&self, active: bool) {
        let was = self.shared.active.swap(active, Ordering::SeqCst);
        if active && !was {
            self.shared.meta_sent.store(false, Ordering::SeqCst);
            info!("Session replay activated");
        } else if !active && was {
            info!("Session replay deactivated");
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Whether a meta event has gone out since the span began
    pub fn meta_sent(&self) -> bool {
        self.shared.meta_sent.load(Ordering::SeqCst)
    }

    /// Stop and reap the flush thread. Buffered but unsent records are
    /// discarded; call [`flush`] first to drain them.
    ///
    /// [`flush`]: SessionReplayPipeline::flush
    pub fn stop(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.wake.notify_all();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Replay flush thread panicked");
            }
        }
    }
}

impl Drop for SessionReplayPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn take_buffers(buffers: &mut Buffers) -> (Vec<Snapshot>, Vec<MetaEvent>) {
    buffers.last_batch = Instant::now();
    (
        std::mem::take(&mut buffers.snapshots),
        std::mem::take(&mut buffers.metas),
    )
}

/// Assemble one replay batch and post it. Meta records go first so the
/// collector knows the viewport before the frames that follow. A failed
/// post drops the batch; replay data is not durable.
fn send_batch(shared: &Shared, snapshots: Vec<Snapshot>, metas: Vec<MetaEvent>) {
    if snapshots.is_empty() && metas.is_empty() {
        return;
    }

    let distinct_id = match shared.store.get_or_create_distinct_id() {
        Ok(id) => id,
        Err(e) => {
            warn!("Falling back to generated distinct id: {}", e);
            ids::fallback_distinct_id()
        }
    };
    let session_id = match shared.store.session_id() {
        Ok(Some(id)) => id,
        Ok(None) => ids::fallback_session_id(),
        Err(e) => {
            warn!("Falling back to generated session id: {}", e);
            ids::fallback_session_id()
        }
    };

    let mut records = Vec::with_capacity(metas.len() + snapshots.len());
    for meta in &metas {
        let data = json!([{
            "type": 4,
            "data": {
                "href": meta.screen,
                "width": meta.width,
                "height": meta.height,
            },
            "timestamp": meta.timestamp,
        }]);
        records.push(snapshot_record(
            &distinct_id,
            &session_id,
            meta.timestamp,
            meta.width,
            meta.height,
            data,
        ));
    }
    for snapshot in &snapshots {
        let data = json!([{
            "type": 2,
            "data": {
                "initialOffset": {"top": 0, "left": 0},
                "wireframes": [{
                    "id": snapshot.wireframe_id,
                    "x": snapshot.x,
                    "y": snapshot.y,
                    "width": snapshot.width,
                    "height": snapshot.height,
                    "type": "screenshot",
                    "base64": snapshot.image_base64,
                    "style": {},
                }],
                "timestamp": snapshot.timestamp,
            },
            "timestamp": snapshot.timestamp,
        }]);
        records.push(snapshot_record(
            &distinct_id,
            &session_id,
            snapshot.timestamp,
            snapshot.width,
            snapshot.height,
            data,
        ));
    }

    let count = records.len();
    let response = shared.transport.post_replay(&records);
    if response.success {
        debug!("Delivered {} replay records", count);
    } else {
        warn!(
            "Replay batch of {} records failed (HTTP {}), dropping",
            count, response.status
        );
    }
}

fn snapshot_record(
    distinct_id: &str,
    session_id: &str,
    timestamp: i64,
    width: u32,
    height: u32,
    snapshot_data: Value,
) -> Value {
    json!({
        "event": "$snapshot",
        "distinct_id": distinct_id,
        "timestamp": timestamp.to_string(),
        "properties": {
            "$snapshot_source": "mobile",
            "$session_id": session_id,
            "$window_id": WINDOW_ID,
            "$lib": LIB_NAME,
            "$lib_version": VERSION,
            "$device_type": DEVICE_TYPE,
            "$os": std::env::consts::OS,
            "$screen_width": width,
            "$screen_height": height,
            "$snapshot_data": snapshot_data,
        },
    })
}
