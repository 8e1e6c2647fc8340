//! Transport Adapter
//!
//! Thin wrapper over the node's UDP socket. The socket is shared: every loop
//! may send through it concurrently, only the receive loop reads from it.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

use super::protocol::Message;

const RECV_BUFFER_SIZE: usize = 65_536;

/// A message addressed to a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub to: SocketAddr,
    pub message: Message,
}

pub struct Transport {
    socket: UdpSocket,
}

impl Transport {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to start UDP listener at {}", addr))?;

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("Failed to read local socket address")
    }

    /// Sends one datagram. Failures are logged and otherwise ignored; an
    /// unreachable peer is discovered by probe timeouts, not here.
    pub async fn send(&self, envelope: &Envelope) {
        let encoded = match envelope.message.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(
                    "Dropping {} to {}: {}",
                    envelope.message.kind(),
                    envelope.to,
                    e
                );
                return;
            }
        };

        match self.socket.send_to(&encoded, envelope.to).await {
            Ok(_) => tracing::debug!("Sent {} to {}", envelope.message.kind(), envelope.to),
            Err(e) => tracing::warn!(
                "Failed to send {} to {}: {}",
                envelope.message.kind(),
                envelope.to,
                e
            ),
        }
    }

    /// Waits at most `timeout` for the next valid message.
    ///
    /// Returns `None` on timeout, on a malformed datagram (logged as a warning)
    /// and on socket errors (logged, followed by a short back-off).
    pub async fn recv(&self, buf: &mut [u8], timeout: Duration) -> Option<(Message, SocketAddr)> {
        let (len, src) = match tokio::time::timeout(timeout, self.socket.recv_from(buf)).await {
            Err(_) => return None,
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                tracing::error!("Failed to receive UDP packet: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
                return None;
            }
        };

        match Message::decode(&buf[..len]) {
            Ok(message) => Some((message, src)),
            Err(e) => {
                tracing::warn!("Dropping malformed datagram from {}: {}", src, e);
                None
            }
        }
    }

    pub fn buffer() -> Vec<u8> {
        vec![0u8; RECV_BUFFER_SIZE]
    }
}
