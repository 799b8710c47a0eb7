// Reachability monitor — cached PING/PONG liveness probe of the peer
//
// A probe result stays fresh for the TTL. Concurrent callers that find the
// cache stale share one probe.

use super::abstraction::DatagramLink;
use crate::clock::Clock;
use crate::message::protocol::{is_pong, PING};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace};

pub const DEFAULT_TTL: Duration = Duration::from_secs(3);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Last probe result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReachabilityState {
    /// Clock millis when the last probe started, `None` before the first one
    pub last_probe_at: Option<u64>,
    pub reachable: bool,
}

pub struct ReachabilityMonitor {
    link: Arc<dyn DatagramLink>,
    clock: Arc<dyn Clock>,
    target: RwLock<SocketAddr>,
    ttl: Duration,
    probe_timeout: Duration,
    state: RwLock<ReachabilityState>,
    probe_lock: AsyncMutex<()>,
    probes: AtomicU64,
}

impl ReachabilityMonitor {
    pub fn new(link: Arc<dyn DatagramLink>, clock: Arc<dyn Clock>, target: SocketAddr) -> Self {
        Self {
            link,
            clock,
            target: RwLock::new(target),
            ttl: DEFAULT_TTL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            state: RwLock::new(ReachabilityState::default()),
            probe_lock: AsyncMutex::new(()),
            probes: AtomicU64::new(0),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Cached answer if younger than the TTL, otherwise a fresh probe
    pub async fn is_reachable(&self) -> bool {
        if let Some(reachable) = self.fresh() {
            return reachable;
        }

        let _guard = self.probe_lock.lock().await;
        // Someone else may have probed while we waited
        if let Some(reachable) = self.fresh() {
            return reachable;
        }
        self.probe().await
    }

    /// Probe regardless of cache age. Returns `(previous, current)`.
    pub async fn force_probe(&self) -> (bool, bool) {
        let _guard = self.probe_lock.lock().await;
        let previous = self.state.read().reachable;
        let current = self.probe().await;
        (previous, current)
    }

    pub fn cached(&self) -> ReachabilityState {
        *self.state.read()
    }

    /// Number of probes sent since creation
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }

    pub fn target(&self) -> SocketAddr {
        *self.target.read()
    }

    /// Point at a new address; the cache is discarded
    pub fn set_target(&self, target: SocketAddr) {
        *self.target.write() = target;
        self.reset();
    }

    /// Forget the last probe so the next query probes again
    pub fn reset(&self) {
        *self.state.write() = ReachabilityState::default();
    }

    fn fresh(&self) -> Option<bool> {
        let state = *self.state.read();
        let last = state.last_probe_at?;
        let age = self.clock.now_millis().saturating_sub(last);
        if u128::from(age) < self.ttl.as_millis() {
            trace!("Reachability cache hit ({} ms old)", age);
            Some(state.reachable)
        } else {
            None
        }
    }

    async fn probe(&self) -> bool {
        let started = self.clock.now_millis();
        let target = self.target();
        self.probes.fetch_add(1, Ordering::Relaxed);

        let reachable = match self
            .link
            .request(target, PING.as_bytes(), self.probe_timeout)
            .await
        {
            Ok(reply) if is_pong(&reply) => true,
            Ok(reply) => {
                debug!(
                    "Unexpected ping reply from {}: {}",
                    target,
                    String::from_utf8_lossy(&reply)
                );
                false
            }
            Err(e) => {
                debug!("Ping to {} failed: {}", target, e);
                false
            }
        };

        *self.state.write() = ReachabilityState {
            last_probe_at: Some(started),
            reachable,
        };
        reachable
    }
}
