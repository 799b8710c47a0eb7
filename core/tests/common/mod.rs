// Shared fakes for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use deskbridge_core::message::protocol::{PING, PONG};
use deskbridge_core::{
    DatagramLink, DomainStore, PacketCodec, SharedKeyCrypto, SystemClock, TransportError,
    TransportEvent, TransportObserver,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const CIPHER_SECRET: &str = "my_secret_16byte";
pub const MAC_SECRET: &str = "my_hmac_secret_key";

pub fn crypto(encryption: bool) -> Arc<SharedKeyCrypto> {
    Arc::new(SharedKeyCrypto::from_secrets(CIPHER_SECRET, MAC_SECRET).with_encryption(encryption))
}

/// Decode a wire packet the way the companion would
pub fn open(crypto: Arc<SharedKeyCrypto>, wire: &str) -> String {
    PacketCodec::new(crypto, Arc::new(SystemClock))
        .open(wire)
        .expect("packet should verify")
}

/// In-memory peer: answers pings while online, records every datagram
pub struct FakePeerLink {
    online: AtomicBool,
    /// Sends allowed before every further send fails; `usize::MAX` for unlimited
    send_budget: AtomicUsize,
    probes: AtomicUsize,
    sent: Mutex<Vec<(SocketAddr, String)>>,
}

impl FakePeerLink {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            send_budget: AtomicUsize::new(usize::MAX),
            probes: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_send_budget(&self, budget: usize) {
        self.send_budget.store(budget, Ordering::SeqCst);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(SocketAddr, String)> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, port: u16) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(addr, _)| addr.port() == port)
            .map(|(_, wire)| wire.clone())
            .collect()
    }
}

#[async_trait]
impl DatagramLink for FakePeerLink {
    async fn send(&self, target: SocketAddr, payload: &[u8]) -> Result<(), TransportError> {
        let allowed = self
            .send_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                usize::MAX => Some(usize::MAX),
                0 => None,
                n => Some(n - 1),
            })
            .is_ok();
        if !allowed {
            return Err(TransportError::Io("network is unreachable".to_string()));
        }
        self.sent
            .lock()
            .push((target, String::from_utf8_lossy(payload).into_owned()));
        Ok(())
    }

    async fn request(
        &self,
        _target: SocketAddr,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        if payload == PING.as_bytes() {
            self.probes.fetch_add(1, Ordering::SeqCst);
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout(timeout));
        }
        Ok(PONG.as_bytes().to_vec())
    }
}

pub struct FixedStore(pub i64);

impl DomainStore for FixedStore {
    fn last_chat_sync_ms(&self) -> i64 {
        self.0
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<TransportEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&TransportEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(*e)).count()
    }
}

impl TransportObserver for RecordingObserver {
    fn on_event(&self, event: &TransportEvent) {
        self.events.lock().push(event.clone());
    }
}

pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
