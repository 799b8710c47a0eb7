// Transport configuration
//
// Timings are stored in milliseconds so the struct serializes cleanly into
// the front-end's config file. Port numbers live in `transport::ports`.

use crate::transport::discovery::DiscoveryConfig;
use crate::transport::dispatch::DEFAULT_MAX_IN_FLIGHT;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Companion address; all ports are reached on this IP
    pub peer_ip: IpAddr,

    /// How long a reachability probe result stays fresh
    pub reachability_ttl_ms: u64,

    /// Reply wait for a reachability probe
    pub probe_timeout_ms: u64,

    /// Reply wait for an explicit connection test
    pub ping_timeout_ms: u64,

    /// Monitor loop tick
    pub monitor_interval_ms: u64,

    /// Reply wait for a file-list request
    pub file_list_timeout_ms: u64,

    pub discovery_window_ms: u64,
    pub discovery_poll_ms: u64,

    /// Maximum concurrently running outbound operations
    pub max_in_flight: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            peer_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            reachability_ttl_ms: 3_000,
            probe_timeout_ms: 500,
            ping_timeout_ms: 2_000,
            monitor_interval_ms: 5_000,
            file_list_timeout_ms: 3_000,
            discovery_window_ms: 3_000,
            discovery_poll_ms: 500,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl TransportConfig {
    pub fn with_peer_ip(peer_ip: IpAddr) -> Self {
        Self {
            peer_ip,
            ..Self::default()
        }
    }

    pub fn reachability_ttl(&self) -> Duration {
        Duration::from_millis(self.reachability_ttl_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn file_list_timeout(&self) -> Duration {
        Duration::from_millis(self.file_list_timeout_ms)
    }

    /// Discovery settings with the default listen and probe addresses
    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            window: Duration::from_millis(self.discovery_window_ms),
            poll_interval: Duration::from_millis(self.discovery_poll_ms),
            ..DiscoveryConfig::default()
        }
    }
}
