//! Forward Emitter - consumes merged records and sends them downstream
//!
//! Each record becomes up to two OSC messages:
//!
//! ```text
//! TrackerRecord ──► /tracking/trackers/{id}/position  [x, y, z]
//!               └─► /tracking/trackers/{id}/rotation  [x, y, z]
//! ```
//!
//! Which fields are sent is decided by the [`EmitPolicy`].

use rosc::{OscMessage, OscType};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::OutboundTransport;
use crate::tracking::{TrackerRecord, Vec3, ZERO_VEC3};

/// Decides which fields of a record are sent
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitPolicy {
    /// Skip a field whose vector is exactly zero (wire-compatible behavior).
    /// A tracker at the origin or at zero rotation is not forwarded for that field.
    #[default]
    NonZero,
    /// Send a field once any update has set it, even when it is zero
    Presence,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EmitterStats {
    pub records: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
}

pub struct ForwardEmitter<T> {
    forward_rx: mpsc::Receiver<TrackerRecord>,
    transport: T,
    policy: EmitPolicy,
    shutdown: CancellationToken,
    stats: EmitterStats,
}

impl<T: OutboundTransport> ForwardEmitter<T> {
    pub fn new(
        forward_rx: mpsc::Receiver<TrackerRecord>,
        transport: T,
        policy: EmitPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            forward_rx,
            transport,
            policy,
            shutdown,
            stats: EmitterStats::default(),
        }
    }

    /// Sends records until the forwarding queue is closed
    ///
    /// After the shutdown token fires the emitter keeps draining whatever the
    /// update worker still pushes, and returns once the queue is closed and empty.
    pub async fn run(mut self) -> EmitterStats {
        info!("Forward emitter started with policy {:?}", self.policy);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => None,
                record = self.forward_rx.recv() => Some(record),
            };

            match next {
                Some(Some(record)) => self.emit(record).await,
                Some(None) => {
                    debug!("Forwarding queue closed");
                    break;
                }
                None => {
                    info!("Forward emitter draining remaining records");
                    while let Some(record) = self.forward_rx.recv().await {
                        self.emit(record).await;
                    }
                    break;
                }
            }
        }

        info!(
            "Forward emitter stopped: {} records, {} messages sent, {} failed sends",
            self.stats.records, self.stats.messages_sent, self.stats.send_failures
        );
        self.stats
    }

    async fn emit(&mut self, record: TrackerRecord) {
        self.stats.records += 1;

        for message in outbound_messages(&record, self.policy) {
            let addr = message.addr.clone();
            match self.transport.send(message).await {
                Ok(()) => self.stats.messages_sent += 1,
                Err(e) => {
                    self.stats.send_failures += 1;
                    warn!("Error sending {}: {}", addr, e);
                }
            }
        }
    }
}

/// Builds the outbound messages for a record, position first
pub fn outbound_messages(record: &TrackerRecord, policy: EmitPolicy) -> Vec<OscMessage> {
    let (send_position, send_rotation) = match policy {
        EmitPolicy::NonZero => (record.position != ZERO_VEC3, record.rotation != ZERO_VEC3),
        EmitPolicy::Presence => (record.has_position, record.has_rotation),
    };

    let mut messages = Vec::with_capacity(2);
    if send_position {
        messages.push(pose_message(record.id, "position", &record.position));
    }
    if send_rotation {
        messages.push(pose_message(record.id, "rotation", &record.rotation));
    }
    messages
}

fn pose_message(id: u64, kind: &str, values: &Vec3) -> OscMessage {
    OscMessage {
        addr: format!("/tracking/trackers/{}/{}", id, kind),
        args: values.iter().copied().map(OscType::Float).collect(),
    }
}
