// LAN discovery — broadcast a probe, collect companion replies for a fixed window
//
// Replies arrive on a dedicated listening port, not on the socket that sent
// the probe, so the listener is bound first.

use super::ports;
use crate::message::protocol::{DISCOVERY_REQUEST, LAPTOP_IP_FOUND, LAPTOP_SERVER_ACTIVE};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Failed to bind discovery listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to send discovery probe to {addr}: {source}")]
    Probe {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Where replies are received
    pub listen_addr: SocketAddr,
    /// Where the probe is sent; the limited broadcast address by default
    pub probe_target: SocketAddr,
    /// How long to collect replies
    pub window: Duration,
    /// Receive poll granularity
    pub poll_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            listen_addr: (Ipv4Addr::UNSPECIFIED, ports::DISCOVERY_REPLY).into(),
            probe_target: (Ipv4Addr::BROADCAST, ports::WATCHDOG).into(),
            window: Duration::from_secs(3),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Accepted reply literals
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiscoveryReply {
    /// Companion is up but its main server may be stopped
    IpFound,
    /// Companion main server is running
    ServerActive,
}

impl DiscoveryReply {
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        match String::from_utf8_lossy(datagram).trim() {
            LAPTOP_IP_FOUND => Some(DiscoveryReply::IpFound),
            LAPTOP_SERVER_ACTIVE => Some(DiscoveryReply::ServerActive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryService {
    config: DiscoveryConfig,
}

impl DiscoveryService {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Run one round and return every distinct responder address.
    ///
    /// Never fails: a listener that cannot be bound yields an empty set.
    pub async fn discover(&self) -> HashSet<IpAddr> {
        self.discover_peers().await.into_keys().collect()
    }

    /// Like `discover`, keeping the strongest reply seen from each address
    pub async fn discover_peers(&self) -> HashMap<IpAddr, DiscoveryReply> {
        match self.try_discover().await {
            Ok(found) => found,
            Err(e) => {
                warn!("Discovery unavailable: {}", e);
                HashMap::new()
            }
        }
    }

    pub async fn try_discover(&self) -> Result<HashMap<IpAddr, DiscoveryReply>, DiscoveryError> {
        let addr = self.config.listen_addr;
        let listener = bind_listener(addr).map_err(|source| DiscoveryError::Bind { addr, source })?;

        match send_probe(self.config.probe_target).await {
            Ok(()) => debug!(
                "Discovery probe sent to {}, listening on {}",
                self.config.probe_target, addr
            ),
            // Keep listening: a companion may still announce itself
            Err(e) => warn!("{}", e),
        }

        let found = collect_replies(&listener, self.config.window, self.config.poll_interval).await;
        info!("Discovery finished: {} server(s)", found.len());
        Ok(found)
    }
}

fn bind_listener(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

async fn send_probe(target: SocketAddr) -> Result<(), DiscoveryError> {
    let probe_err = |source| DiscoveryError::Probe {
        addr: target,
        source,
    };
    let local: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await.map_err(probe_err)?;
    socket.set_broadcast(true).map_err(probe_err)?;
    socket
        .send_to(DISCOVERY_REQUEST.as_bytes(), target)
        .await
        .map_err(probe_err)?;
    Ok(())
}

async fn collect_replies(
    socket: &UdpSocket,
    window: Duration,
    poll_interval: Duration,
) -> HashMap<IpAddr, DiscoveryReply> {
    let deadline = Instant::now() + window;
    let mut found = HashMap::new();
    let mut buf = [0u8; 1024];

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let wait = poll_interval.min(deadline - now);

        match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
            Err(_) => continue,
            Ok(Err(e)) => {
                debug!("Discovery receive error: {}", e);
                tokio::time::sleep(wait.min(Duration::from_millis(50))).await;
            }
            Ok(Ok((len, from))) => match DiscoveryReply::parse(&buf[..len]) {
                Some(reply) => {
                    let ip = from.ip();
                    let best = found.entry(ip).or_insert(reply);
                    if reply > *best {
                        *best = reply;
                    }
                    debug!("Discovery reply {:?} from {}", reply, ip);
                }
                None => debug!("Ignoring discovery datagram from {}", from),
            },
        }
    }

    found
}
