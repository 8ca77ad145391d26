use rosc::{encoder, OscMessage, OscPacket};
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, info};

use super::ForwardError;

/// Outbound side of the relay
///
/// Implementations deliver one OSC message per call and report whether the
/// send succeeded. They are owned by a single emitter task.
pub trait OutboundTransport: Send + 'static {
    fn send(&mut self, message: OscMessage)
        -> impl Future<Output = Result<(), ForwardError>> + Send;
}

/// Sends OSC messages as UDP datagrams to a fixed destination
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpTransport {
    /// Resolves `host:port`, binds an ephemeral local socket and connects it
    pub async fn connect(host: &str, port: u16) -> Result<Self, ForwardError> {
        let destination = lookup_host((host, port))
            .await
            .map_err(|e| ForwardError::Resolve(format!("{}:{} ({})", host, port, e)))?
            .next()
            .ok_or_else(|| ForwardError::Resolve(format!("{}:{} (no addresses)", host, port)))?;

        let local: SocketAddr = if destination.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await.map_err(ForwardError::Bind)?;
        socket
            .connect(destination)
            .await
            .map_err(ForwardError::Bind)?;

        info!("Forwarding OSC to {} from {:?}", destination, socket.local_addr().ok());
        Ok(Self {
            socket,
            destination,
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }
}

impl OutboundTransport for UdpTransport {
    fn send(
        &mut self,
        message: OscMessage,
    ) -> impl Future<Output = Result<(), ForwardError>> + Send {
        async move {
            let addr = message.addr.clone();
            let bytes = encoder::encode(&OscPacket::Message(message))
                .map_err(|e| ForwardError::Encode(format!("{:?}", e)))?;
            self.socket.send(&bytes).await.map_err(ForwardError::Send)?;
            debug!("Sent {} ({} bytes) to {}", addr, bytes.len(), self.destination);
            Ok(())
        }
    }
}
