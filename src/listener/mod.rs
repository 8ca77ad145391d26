//! Inbound OSC listener
//!
//! Receives UDP datagrams, decodes them as OSC packets and feeds every tracker
//! message through the address translator into the pipeline. Bundles are
//! flattened in order. Datagrams that fail to decode and messages that fail to
//! translate are dropped with a debug log.
//!
//! Submitting waits for space in the ingestion queue, so a saturated pipeline
//! slows down the receive loop instead of losing accepted updates in memory.

use rosc::{decoder, OscMessage, OscPacket};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pipeline::{PipelineError, UpdateSender};
use crate::tracking::{translate, TrackerUpdate};

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Failed to bind OSC listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to receive datagram: {0}")]
    Receive(#[source] std::io::Error),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub datagrams: u64,
    pub decode_errors: u64,
    pub accepted: u64,
    pub rejected: u64,
}

pub struct OscListener {
    socket: UdpSocket,
    stats: ListenerStats,
}

impl OscListener {
    pub async fn bind(addr: &str) -> Result<Self, ListenerError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        info!("Starting OSC listener on {:?}", socket.local_addr().ok());
        Ok(Self {
            socket,
            stats: ListenerStats::default(),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    /// Receives until `shutdown` fires or the pipeline stops accepting updates
    pub async fn run(
        mut self,
        sender: UpdateSender,
        shutdown: CancellationToken,
    ) -> Result<ListenerStats, ListenerError> {
        let mut buf = vec![0u8; decoder::MTU];

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("OSC listener stopping");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => received,
            };

            let (len, peer) = match received {
                Ok(received) => received,
                // ICMP errors from earlier sends surface here on some platforms
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                    debug!("Ignoring connection reset on listener socket");
                    continue;
                }
                Err(e) => return Err(ListenerError::Receive(e)),
            };
            self.stats.datagrams += 1;

            let packet = match decoder::decode_udp(&buf[..len]) {
                Ok((_, packet)) => packet,
                Err(e) => {
                    self.stats.decode_errors += 1;
                    debug!("Dropping undecodable datagram from {}: {:?}", peer, e);
                    continue;
                }
            };

            for update in self.collect_updates(packet) {
                match sender.submit(update).await {
                    Ok(()) => {}
                    Err(PipelineError::IngestClosed) => {
                        warn!("Pipeline no longer accepts updates, stopping listener");
                        return Ok(self.stats);
                    }
                    Err(e) => {
                        warn!("Failed to submit update: {}", e);
                    }
                }
            }
        }

        Ok(self.stats)
    }

    fn collect_updates(&mut self, packet: OscPacket) -> Vec<TrackerUpdate> {
        let mut messages = Vec::new();
        flatten_packet(packet, &mut messages);

        let mut updates = Vec::with_capacity(messages.len());
        for msg in messages {
            if !msg.addr.contains("tracking") {
                continue;
            }
            match translate(&msg) {
                Some(update) => {
                    self.stats.accepted += 1;
                    updates.push(update);
                }
                None => self.stats.rejected += 1,
            }
        }
        updates
    }
}

fn flatten_packet(packet: OscPacket, out: &mut Vec<OscMessage>) {
    match packet {
        OscPacket::Message(msg) => out.push(msg),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten_packet(inner, out);
            }
        }
    }
}
