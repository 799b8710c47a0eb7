// UDP datagram link — one ephemeral socket per call

use super::abstraction::{DatagramLink, TransportError};
use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

/// Replies larger than this are truncated
pub const DEFAULT_RECV_BUFFER: usize = 8192;

#[derive(Debug, Clone)]
pub struct UdpLink {
    recv_buffer: usize,
}

impl UdpLink {
    pub fn new() -> Self {
        Self {
            recv_buffer: DEFAULT_RECV_BUFFER,
        }
    }

    pub fn with_recv_buffer(mut self, bytes: usize) -> Self {
        self.recv_buffer = bytes.max(1);
        self
    }

    async fn ephemeral_for(target: SocketAddr) -> std::io::Result<UdpSocket> {
        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        UdpSocket::bind(local).await
    }
}

impl Default for UdpLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatagramLink for UdpLink {
    async fn send(&self, target: SocketAddr, payload: &[u8]) -> Result<(), TransportError> {
        let socket = Self::ephemeral_for(target).await?;
        socket.send_to(payload, target).await?;
        Ok(())
    }

    async fn request(
        &self,
        target: SocketAddr,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let socket = Self::ephemeral_for(target).await?;
        // Connected so only the target's reply is accepted
        socket.connect(target).await?;
        socket.send(payload).await?;

        let mut buf = vec![0u8; self.recv_buffer];
        match tokio::time::timeout(timeout, socket.recv(&mut buf)).await {
            Err(_) => Err(TransportError::Timeout(timeout)),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(len)) => {
                buf.truncate(len);
                Ok(buf)
            }
        }
    }
}
