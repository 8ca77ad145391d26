//! Update worker - the only writer of the tracker store
//!
//! Pulls updates off the ingestion queue one at a time, applies them to the
//! [`TrackerStore`] and pushes the merged record onto the forwarding queue.
//!
//! # State Machine
//!
//! ```text
//! Waiting ──(update received)──► Applying(TrackerUpdate) ──(upsert + forward)──► Waiting
//!    │
//!    └──(queue closed and empty)──► stop
//! ```
//!
//! On shutdown the worker closes the ingestion queue so producers fail fast,
//! applies every update that was already queued and then stops. Dropping the
//! worker drops the forwarding sender, which lets the emitter finish.

use chrono::Local;
use statum::{machine, state};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ForwardOverflow, PipelineError, PipelineStats, UpdateSender};
use crate::tracking::{TrackerRecord, TrackerStore, TrackerUpdate};

const STATS_INTERVAL_SECS: i64 = 30;

#[state]
#[derive(Debug, Clone)]
pub enum WorkerState {
    Waiting,
    Applying(TrackerUpdate),
}

#[machine]
#[derive(Debug)]
pub struct UpdateWorker<S: WorkerState> {
    ingest_rx: mpsc::Receiver<TrackerUpdate>,
    forward_tx: mpsc::Sender<TrackerRecord>,
    store: TrackerStore,
    overflow: ForwardOverflow,
    shutdown: CancellationToken,
    stats: Arc<PipelineStats>,
    draining: bool,
}

impl<S: WorkerState> UpdateWorker<S> {
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}

impl UpdateWorker<Waiting> {
    pub fn create(
        ingest_rx: mpsc::Receiver<TrackerUpdate>,
        forward_tx: mpsc::Sender<TrackerRecord>,
        store: TrackerStore,
        overflow: ForwardOverflow,
        shutdown: CancellationToken,
        stats: Arc<PipelineStats>,
    ) -> Self {
        debug!("Creating update worker with overflow policy {:?}", overflow);
        Self::new(ingest_rx, forward_tx, store, overflow, shutdown, stats, false)
    }

    /// Waits for the next update, or returns `None` once the queue is closed and empty
    pub async fn wait_for_update(mut self) -> Option<UpdateWorker<Applying>> {
        let received = if self.draining {
            Some(self.ingest_rx.recv().await)
        } else {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => None,
                update = self.ingest_rx.recv() => Some(update),
            }
        };

        let update = match received {
            Some(update) => update,
            None => {
                info!(
                    "Shutdown requested, draining {} queued updates",
                    self.ingest_rx.len()
                );
                self.draining = true;
                self.ingest_rx.close();
                self.ingest_rx.recv().await
            }
        };

        match update {
            Some(update) => Some(self.transition_with(update)),
            None => {
                info!("Ingestion queue closed and empty");
                None
            }
        }
    }
}

impl UpdateWorker<Applying> {
    /// Applies the update to the store and hands the merged record to the emitter
    pub async fn apply(self) -> Result<UpdateWorker<Waiting>, PipelineError> {
        let update = match self.get_state_data().copied() {
            Some(update) => update,
            None => {
                warn!("No update found in state data, this should not happen");
                return Ok(self.transition());
            }
        };

        let outcome = self.store.upsert(update).await;
        self.stats.applied.fetch_add(1, Ordering::Relaxed);
        if outcome.corrected {
            self.stats.corrected.fetch_add(1, Ordering::Relaxed);
        }

        match self.overflow {
            ForwardOverflow::Block => {
                if self.forward_tx.send(outcome.record).await.is_err() {
                    error!("Forwarding queue closed while worker is running");
                    return Err(PipelineError::ForwardClosed);
                }
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            ForwardOverflow::DropNewest => match self.forward_tx.try_send(outcome.record) {
                Ok(()) => {
                    self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(record)) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("Forwarding queue full, dropped record for tracker {}", record.id);
                }
                Err(TrySendError::Closed(_)) => {
                    error!("Forwarding queue closed while worker is running");
                    return Err(PipelineError::ForwardClosed);
                }
            },
        }

        Ok(self.transition())
    }
}

/// Creates both queues and spawns the update worker
///
/// Returns the producer side of the ingestion queue, the consumer side of the
/// forwarding queue and the worker task.
pub fn spawn_update_worker(
    store: TrackerStore,
    ingest_capacity: usize,
    forward_capacity: usize,
    overflow: ForwardOverflow,
    shutdown: CancellationToken,
    stats: Arc<PipelineStats>,
) -> (
    UpdateSender,
    mpsc::Receiver<TrackerRecord>,
    JoinHandle<Result<(), PipelineError>>,
) {
    let (ingest_tx, ingest_rx) = mpsc::channel(ingest_capacity);
    let (forward_tx, forward_rx) = mpsc::channel(forward_capacity);
    debug!(
        "Created ingestion queue ({}) and forwarding queue ({})",
        ingest_capacity, forward_capacity
    );

    let worker = UpdateWorker::create(ingest_rx, forward_tx, store, overflow, shutdown, stats);
    let task_handle = tokio::spawn(async move {
        info!("Update worker task started");
        let result = run_update_worker(worker).await;
        match &result {
            Ok(()) => info!("Update worker finished"),
            Err(e) => error!("Update worker terminated with error: {}", e),
        }
        result
    });

    (UpdateSender::new(ingest_tx), forward_rx, task_handle)
}

async fn run_update_worker(mut worker: UpdateWorker<Waiting>) -> Result<(), PipelineError> {
    let mut last_stats_time = Local::now();
    let mut last_applied = 0;
    let stats_interval = chrono::Duration::seconds(STATS_INTERVAL_SECS);

    while let Some(applying) = worker.wait_for_update().await {
        worker = applying.apply().await?;

        let now = Local::now();
        if now - last_stats_time > stats_interval {
            let counters = worker.stats().counters();
            let elapsed_seconds = (now - last_stats_time).num_seconds().max(1);
            info!(
                "Pipeline stats: {} applied ({:.1}/s), {} corrected, {} forwarded, {} dropped",
                counters.applied,
                (counters.applied - last_applied) as f64 / elapsed_seconds as f64,
                counters.corrected,
                counters.forwarded,
                counters.dropped
            );
            last_applied = counters.applied;
            last_stats_time = now;
        }
    }

    Ok(())
}
