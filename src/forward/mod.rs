//! # Forwarding Module
//!
//! Sends merged tracker records to the downstream OSC consumer.
//!
//! ```text
//! forward/
//! ├── emitter.rs    - Forwarding queue consumer, record to OSC messages
//! └── transport.rs  - OutboundTransport seam and the UDP implementation
//! ```
//!
//! Delivery is best effort. A failed send is logged and the record is
//! considered done; nothing is retried or reported back to the pipeline.

pub mod emitter;
pub mod transport;

pub use emitter::{outbound_messages, EmitPolicy, EmitterStats, ForwardEmitter};
pub use transport::{OutboundTransport, UdpTransport};

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Failed to resolve destination {0}")]
    Resolve(String),

    #[error("Failed to bind outbound socket: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Failed to encode OSC packet: {0}")]
    Encode(String),

    #[error("Failed to send OSC packet: {0}")]
    Send(#[source] std::io::Error),
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{ForwardError, OutboundTransport};
    use rosc::OscMessage;
    use std::future::Future;
    use std::io;
    use tokio::sync::mpsc;

    /// Hands every sent message to a channel instead of the network
    pub struct RecordingTransport {
        tx: mpsc::UnboundedSender<OscMessage>,
    }

    impl RecordingTransport {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<OscMessage>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self { tx }, rx)
        }
    }

    impl OutboundTransport for RecordingTransport {
        fn send(
            &mut self,
            message: OscMessage,
        ) -> impl Future<Output = Result<(), ForwardError>> + Send {
            let result = self.tx.send(message).map_err(|_| {
                ForwardError::Send(io::Error::new(io::ErrorKind::BrokenPipe, "recorder dropped"))
            });
            async move { result }
        }
    }

    /// Fails every other send, starting with the first
    pub struct FlakyTransport {
        calls: usize,
        tx: mpsc::UnboundedSender<OscMessage>,
    }

    impl FlakyTransport {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<OscMessage>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self { calls: 0, tx }, rx)
        }
    }

    impl OutboundTransport for FlakyTransport {
        fn send(
            &mut self,
            message: OscMessage,
        ) -> impl Future<Output = Result<(), ForwardError>> + Send {
            self.calls += 1;
            let result = if self.calls % 2 == 1 {
                Err(ForwardError::Send(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "destination unreachable",
                )))
            } else {
                let _ = self.tx.send(message);
                Ok(())
            };
            async move { result }
        }
    }
}
