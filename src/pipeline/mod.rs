//! Update/Forward pipeline
//!
//! Serializes every store mutation through one worker and feeds the results to
//! the forward emitter:
//!
//! ```text
//! producers ──► [ingestion queue] ──► UpdateWorker ──► [forwarding queue] ──► ForwardEmitter
//!  (submit)       bounded, FIFO       (store writer)     bounded, FIFO         (transport)
//! ```
//!
//! Both queues are bounded. A full ingestion queue blocks producers; a full
//! forwarding queue blocks the worker unless [`ForwardOverflow::DropNewest`] is
//! configured, in which case the record is dropped from forwarding only.
//!
//! [`PipelineHandle::shutdown`] stops both tasks with drain-then-stop semantics:
//! everything already queued is applied and forwarded before the tasks return.

pub mod worker;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::forward::{EmitPolicy, EmitterStats, ForwardEmitter, OutboundTransport};
use crate::tracking::{InversionSettings, TrackerStore, TrackerUpdate};
pub use worker::spawn_update_worker;

pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// What the update worker does when the forwarding queue is full
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardOverflow {
    /// Wait for space, stalling store updates behind a slow emitter
    #[default]
    Block,
    /// Skip forwarding the record that does not fit; the store is still updated
    DropNewest,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub inversion: InversionSettings,
    pub ingest_capacity: usize,
    pub forward_capacity: usize,
    pub overflow: ForwardOverflow,
    pub emit_policy: EmitPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            inversion: InversionSettings::default(),
            ingest_capacity: DEFAULT_QUEUE_CAPACITY,
            forward_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: ForwardOverflow::Block,
            emit_policy: EmitPolicy::NonZero,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Ingestion queue is closed")]
    IngestClosed,

    #[error("Forwarding queue is closed")]
    ForwardClosed,

    #[error("Pipeline task failed: {0}")]
    TaskFailed(String),
}

/// Counters shared between the worker and the handle
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub applied: AtomicU64,
    pub corrected: AtomicU64,
    pub forwarded: AtomicU64,
    pub dropped: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineCounters {
    pub applied: u64,
    pub corrected: u64,
    pub forwarded: u64,
    pub dropped: u64,
}

impl PipelineStats {
    pub fn counters(&self) -> PipelineCounters {
        PipelineCounters {
            applied: self.applied.load(Ordering::Relaxed),
            corrected: self.corrected.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Producer side of the ingestion queue
#[derive(Clone, Debug)]
pub struct UpdateSender {
    tx: mpsc::Sender<TrackerUpdate>,
}

impl UpdateSender {
    pub fn new(tx: mpsc::Sender<TrackerUpdate>) -> Self {
        Self { tx }
    }

    /// Queues an update, waiting while the ingestion queue is full
    pub async fn submit(&self, update: TrackerUpdate) -> Result<(), PipelineError> {
        self.tx
            .send(update)
            .await
            .map_err(|_| PipelineError::IngestClosed)
    }
}

/// Final numbers reported by [`PipelineHandle::shutdown`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub counters: PipelineCounters,
    pub emitter: EmitterStats,
    pub trackers: usize,
}

pub struct PipelineHandle {
    sender: UpdateSender,
    store: TrackerStore,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
    worker_handle: JoinHandle<Result<(), PipelineError>>,
    emitter_handle: JoinHandle<EmitterStats>,
}

impl PipelineHandle {
    /// Spawns the update worker and the forward emitter
    pub fn spawn<T: OutboundTransport>(settings: PipelineSettings, transport: T) -> Self {
        info!("Spawning tracker pipeline with settings: {:?}", settings);

        let store = TrackerStore::new(settings.inversion);
        let stats = Arc::new(PipelineStats::default());
        let shutdown = CancellationToken::new();

        let (sender, forward_rx, worker_handle) = spawn_update_worker(
            store.clone(),
            settings.ingest_capacity,
            settings.forward_capacity,
            settings.overflow,
            shutdown.clone(),
            stats.clone(),
        );

        let emitter = ForwardEmitter::new(
            forward_rx,
            transport,
            settings.emit_policy,
            shutdown.clone(),
        );
        let emitter_handle = tokio::spawn(emitter.run());
        debug!("Forward emitter task spawned");

        Self {
            sender,
            store,
            stats,
            shutdown,
            worker_handle,
            emitter_handle,
        }
    }

    /// A producer handle; clone freely
    pub fn sender(&self) -> UpdateSender {
        self.sender.clone()
    }

    pub async fn submit(&self, update: TrackerUpdate) -> Result<(), PipelineError> {
        self.sender.submit(update).await
    }

    /// Read access to the tracker state
    pub fn store(&self) -> TrackerStore {
        self.store.clone()
    }

    pub fn counters(&self) -> PipelineCounters {
        self.stats.counters()
    }

    /// Token cancelled when the pipeline shuts down, for tasks that feed it
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops accepting updates, drains both queues and waits for both tasks
    pub async fn shutdown(self) -> Result<PipelineSummary, PipelineError> {
        info!("Shutting down tracker pipeline");
        self.shutdown.cancel();
        drop(self.sender);

        let worker_result = match self.worker_handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("Update worker panicked: {}", e);
                Err(PipelineError::TaskFailed(format!("update worker: {}", e)))
            }
        };

        let emitter = self.emitter_handle.await.map_err(|e| {
            error!("Forward emitter panicked: {}", e);
            PipelineError::TaskFailed(format!("forward emitter: {}", e))
        })?;
        worker_result?;

        let records = self.store.snapshot().await;
        for record in &records {
            debug!(
                "Tracker {} final pose: position {:?}, rotation {:?}",
                record.id, record.position, record.rotation
            );
        }

        let summary = PipelineSummary {
            counters: self.stats.counters(),
            emitter,
            trackers: records.len(),
        };
        info!(
            "Pipeline stopped: {} trackers, {} updates applied, {} flips corrected, \
             {} messages sent",
            summary.trackers,
            summary.counters.applied,
            summary.counters.corrected,
            summary.emitter.messages_sent
        );
        Ok(summary)
    }
}
