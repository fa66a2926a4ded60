//! Bounded background queue for fire-and-forget telemetry.
//!
//! Only best-effort observations (source usage) go through here; event and
//! feedback logging stay on the synchronous path where integrity errors can
//! reach the caller. Queue policy: bounded channel, events dropped when
//! full.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::store::TelemetryStore;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// One best-effort observation.
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    SourceUsage {
        source_name: String,
        adjusted_score: f64,
    },
}

/// Cheap cloneable handle for submitting events.
#[derive(Clone)]
pub struct TelemetrySender {
    tx: mpsc::Sender<TelemetryEvent>,
}

impl TelemetrySender {
    /// Submit an event without waiting. Dropped with a debug log when the
    /// queue is full or the worker is gone.
    pub fn send(&self, event: TelemetryEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::debug!("Telemetry event dropped: {}", e);
        }
    }
}

/// Spawn the drain task. The worker exits when every sender is dropped.
pub fn spawn_worker(
    store: Arc<TelemetryStore>,
    capacity: usize,
) -> (TelemetrySender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<TelemetryEvent>(capacity);

    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                TelemetryEvent::SourceUsage {
                    source_name,
                    adjusted_score,
                } => {
                    if let Err(e) = store.record_source_usage(&source_name, adjusted_score) {
                        tracing::warn!("Failed to record source usage: {}", e);
                    }
                }
            }
        }
        tracing::debug!("Telemetry worker stopped");
    });

    (TelemetrySender { tx }, handle)
}

// ============================================================================
// Tests
// ============================================================================
