// Transport module — datagram link, reachability, discovery and the connection manager

pub mod abstraction;
pub mod discovery;
pub mod dispatch;
pub mod manager;
pub mod reachability;
pub mod udp;

#[cfg(test)]
pub(crate) mod testing;

/// Companion ports. Every port is reached on the configured peer IP, except
/// discovery replies, which arrive on the device.
pub mod ports {
    /// Signed command packets, connection tests and reachability probes
    pub const COMMAND: u16 = 5005;
    /// File transfer
    pub const FILE: u16 = 5006;
    /// Watchdog control literals and the discovery probe
    pub const WATCHDOG: u16 = 5007;
    /// Standalone ping responder
    pub const PING: u16 = 5008;
    pub const BACKEND_SHARING: u16 = 5009;
    /// Where the device listens for discovery replies
    pub const DISCOVERY_REPLY: u16 = 37020;
}

pub use abstraction::{
    DatagramLink, QueueReason, TracingObserver, TransportError, TransportEvent, TransportObserver,
};
pub use discovery::{DiscoveryConfig, DiscoveryError, DiscoveryReply, DiscoveryService};
pub use dispatch::Dispatcher;
pub use manager::{ConnectionManager, HandshakeOutcome, SendOutcome};
pub use reachability::{ReachabilityMonitor, ReachabilityState};
pub use udp::UdpLink;
