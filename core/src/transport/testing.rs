// Scripted in-memory link for unit tests

use super::abstraction::{DatagramLink, TransportError};
use crate::message::protocol::{PING, PONG};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub(crate) struct ScriptedLink {
    online: AtomicBool,
    fail_sends: AtomicBool,
    delay: Duration,
    ping_reply: Mutex<String>,
    data_reply: Mutex<Option<String>>,
    requests: AtomicUsize,
    last_request_target: Mutex<Option<SocketAddr>>,
    sent: Mutex<Vec<(SocketAddr, String)>>,
}

impl ScriptedLink {
    fn with_state(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            fail_sends: AtomicBool::new(false),
            delay: Duration::ZERO,
            ping_reply: Mutex::new(PONG.to_string()),
            data_reply: Mutex::new(None),
            requests: AtomicUsize::new(0),
            last_request_target: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn online() -> Self {
        Self::with_state(true)
    }

    pub fn offline() -> Self {
        Self::with_state(false)
    }

    /// Delay every request by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn set_ping_reply(&self, reply: &str) {
        *self.ping_reply.lock() = reply.to_string();
    }

    /// Reply for any non-ping request
    pub fn set_data_reply(&self, reply: Option<&str>) {
        *self.data_reply.lock() = reply.map(str::to_string);
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn last_request_target(&self) -> Option<SocketAddr> {
        *self.last_request_target.lock()
    }

    /// Every payload delivered with `send` and every non-ping request
    pub fn sent(&self) -> Vec<(SocketAddr, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl DatagramLink for ScriptedLink {
    async fn send(&self, target: SocketAddr, payload: &[u8]) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Io("network is unreachable".to_string()));
        }
        self.sent
            .lock()
            .push((target, String::from_utf8_lossy(payload).into_owned()));
        Ok(())
    }

    async fn request(
        &self,
        target: SocketAddr,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        *self.last_request_target.lock() = Some(target);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout(timeout));
        }

        if payload == PING.as_bytes() {
            return Ok(self.ping_reply.lock().clone().into_bytes());
        }

        self.sent
            .lock()
            .push((target, String::from_utf8_lossy(payload).into_owned()));
        match self.data_reply.lock().clone() {
            Some(reply) => Ok(reply.into_bytes()),
            None => Err(TransportError::Timeout(timeout)),
        }
    }
}
