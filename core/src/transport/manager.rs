// Connection manager — the one object the device's feature code talks to
//
// Combines the packet codec, the reachability monitor, the outbox and
// discovery, runs every outbound operation on the bounded dispatcher and
// drives the background monitor that replays the outbox on reconnect.

use super::abstraction::{
    DatagramLink, QueueReason, TracingObserver, TransportError, TransportEvent, TransportObserver,
};
use super::discovery::{DiscoveryConfig, DiscoveryReply, DiscoveryService};
use super::dispatch::Dispatcher;
use super::ports;
use super::reachability::{ReachabilityMonitor, ReachabilityState};
use super::udp::UdpLink;
use crate::clock::{Clock, SystemClock};
use crate::config::TransportConfig;
use crate::crypto::CryptoProvider;
use crate::message::protocol::{self, abbrev, is_pong, PING};
use crate::message::{HandshakeRequest, PacketCodec};
use crate::store::{CommandSender, FlushReport, Outbox};
use crate::DomainStore;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of `send_data_command`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Queued(QueueReason),
    /// Neither sent nor stored: the command cannot be encoded, or the outbox
    /// refused it
    Dropped(TransportError),
}

/// Result of `perform_handshake`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Sent,
    /// The peer was unreachable; nothing was sent or queued
    Skipped,
    /// The peer looked reachable but the send failed; not queued
    Failed(TransportError),
}

struct Shared {
    config: TransportConfig,
    peer_ip: RwLock<IpAddr>,
    link: Arc<dyn DatagramLink>,
    clock: Arc<dyn Clock>,
    codec: PacketCodec,
    reachability: ReachabilityMonitor,
    outbox: Arc<Outbox>,
    store: Arc<dyn DomainStore>,
    observer: Arc<dyn TransportObserver>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        self.observer.on_event(&event);
    }

    fn target(&self, port: u16) -> SocketAddr {
        SocketAddr::new(*self.peer_ip.read(), port)
    }

    async fn send_signed(&self, command: &str) -> Result<(), TransportError> {
        let packet = self.codec.encode(command)?;
        self.link
            .send(self.target(ports::COMMAND), packet.to_wire().as_bytes())
            .await
    }

    /// Signed send that reports its outcome to the observer
    async fn send_reported(&self, command: String) -> Result<(), TransportError> {
        match self.send_signed(&command).await {
            Ok(()) => {
                self.emit(TransportEvent::CommandSent { command });
                Ok(())
            }
            Err(error) => {
                self.emit(TransportEvent::SendFailed {
                    command,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    async fn send_data(&self, command: String) -> SendOutcome {
        if !self.reachability.is_reachable().await {
            return self.enqueue(command, QueueReason::Unreachable);
        }

        match self.send_signed(&command).await {
            Ok(()) => {
                self.emit(TransportEvent::CommandSent { command });
                SendOutcome::Sent
            }
            Err(error) if error.is_permanent() => self.drop_command(command, error),
            Err(error) => {
                self.emit(TransportEvent::SendFailed {
                    command: command.clone(),
                    error,
                });
                self.enqueue(command, QueueReason::SendFailed)
            }
        }
    }

    fn drop_command(&self, command: String, error: TransportError) -> SendOutcome {
        self.emit(TransportEvent::CommandDropped {
            command,
            error: error.clone(),
        });
        SendOutcome::Dropped(error)
    }

    fn enqueue(&self, command: String, reason: QueueReason) -> SendOutcome {
        match self.outbox.enqueue(&command) {
            Ok(_) => {
                self.emit(TransportEvent::CommandQueued { command, reason });
                SendOutcome::Queued(reason)
            }
            Err(error) => self.drop_command(command, error.into()),
        }
    }

    async fn handshake(&self, request: HandshakeRequest) -> HandshakeOutcome {
        if !self.reachability.is_reachable().await {
            self.emit(TransportEvent::HandshakeSkipped);
            return HandshakeOutcome::Skipped;
        }

        let command = request.to_command();
        match self.send_signed(&command).await {
            Ok(()) => {
                self.emit(TransportEvent::HandshakeSent { command });
                HandshakeOutcome::Sent
            }
            Err(error) => {
                self.emit(TransportEvent::SendFailed {
                    command,
                    error: error.clone(),
                });
                HandshakeOutcome::Failed(error)
            }
        }
    }

    async fn flush(&self) -> FlushReport {
        let report = self.outbox.flush(self).await;
        self.emit(TransportEvent::FlushCompleted(report.clone()));
        report
    }

    async fn send_watchdog(&self, literal: &str) -> Result<(), TransportError> {
        let target = self.target(ports::WATCHDOG);
        match self.link.send(target, literal.as_bytes()).await {
            Ok(()) => {
                info!("Sent {} to watchdog at {}", literal, target);
                Ok(())
            }
            Err(e) => {
                warn!("Watchdog command {} failed: {}", literal, e);
                Err(e)
            }
        }
    }

    /// One monitor tick: probe, report a change, replay on reconnect.
    ///
    /// `last_seen` is what the previous tick observed. The shared cache is
    /// not used for the transition because any send or probe in between may
    /// already have flipped it. Returns what this tick observed.
    async fn monitor_tick(&self, last_seen: bool) -> bool {
        let (was_reachable, reachable) = self.reachability.force_probe().await;
        if was_reachable != reachable {
            self.emit(TransportEvent::ReachabilityChanged { reachable });
        }

        if !last_seen && reachable {
            let pending = self.outbox.pending_count();
            if pending > 0 {
                info!("Server back online, flushing {} queued command(s)", pending);
                self.flush().await;
            }
        }
        reachable
    }

    async fn run_monitor(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let interval = self.config.monitor_interval();
        self.emit(TransportEvent::MonitorStarted);

        let mut last_seen = false;
        loop {
            if *stop.borrow() {
                break;
            }
            last_seen = self.monitor_tick(last_seen).await;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = stop.changed() => {
                    // A dropped sender also means stop
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        self.emit(TransportEvent::MonitorStopped);
    }
}

#[async_trait]
impl CommandSender for Shared {
    async fn send_command_sync(&self, command: &str) -> Result<(), TransportError> {
        self.send_reported(command.to_string()).await
    }
}

struct MonitorTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Parts {
    config: TransportConfig,
    crypto: Arc<dyn CryptoProvider>,
    store: Arc<dyn DomainStore>,
    link: Arc<dyn DatagramLink>,
    clock: Arc<dyn Clock>,
    outbox: Arc<Outbox>,
    observer: Arc<dyn TransportObserver>,
    discovery: DiscoveryConfig,
}

impl Parts {
    fn assemble(self) -> ConnectionManager {
        let peer_ip = self.config.peer_ip;
        let reachability = ReachabilityMonitor::new(
            Arc::clone(&self.link),
            Arc::clone(&self.clock),
            SocketAddr::new(peer_ip, ports::COMMAND),
        )
        .with_ttl(self.config.reachability_ttl())
        .with_probe_timeout(self.config.probe_timeout());

        let dispatcher = Dispatcher::new(self.config.max_in_flight);
        let shared = Shared {
            codec: PacketCodec::new(self.crypto, Arc::clone(&self.clock)),
            peer_ip: RwLock::new(peer_ip),
            link: self.link,
            clock: self.clock,
            reachability,
            outbox: self.outbox,
            store: self.store,
            observer: self.observer,
            config: self.config,
        };

        ConnectionManager {
            shared: Arc::new(shared),
            dispatcher,
            discovery: DiscoveryService::new(self.discovery),
            monitor: Mutex::new(None),
        }
    }
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
    discovery: DiscoveryService,
    monitor: Mutex<Option<MonitorTask>>,
}

impl ConnectionManager {
    /// Manager with an in-memory outbox, the wall clock and a logging observer
    pub fn new(
        config: TransportConfig,
        crypto: Arc<dyn CryptoProvider>,
        store: Arc<dyn DomainStore>,
        link: Arc<dyn DatagramLink>,
    ) -> Self {
        let discovery = config.discovery();
        Parts {
            config,
            crypto,
            store,
            link,
            clock: Arc::new(SystemClock),
            outbox: Arc::new(Outbox::new()),
            observer: Arc::new(TracingObserver),
            discovery,
        }
        .assemble()
    }

    /// Manager that talks real UDP
    pub fn udp(
        config: TransportConfig,
        crypto: Arc<dyn CryptoProvider>,
        store: Arc<dyn DomainStore>,
    ) -> Self {
        Self::new(config, crypto, store, Arc::new(UdpLink::new()))
    }

    // Builder methods below rebuild the manager; call them before
    // `start_monitor`.

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        let mut parts = self.parts();
        parts.clock = clock;
        parts.assemble()
    }

    pub fn with_outbox(self, outbox: Arc<Outbox>) -> Self {
        let mut parts = self.parts();
        parts.outbox = outbox;
        parts.assemble()
    }

    pub fn with_observer(self, observer: Arc<dyn TransportObserver>) -> Self {
        let mut parts = self.parts();
        parts.observer = observer;
        parts.assemble()
    }

    pub fn with_discovery(self, discovery: DiscoveryConfig) -> Self {
        let mut parts = self.parts();
        parts.discovery = discovery;
        parts.assemble()
    }

    fn parts(&self) -> Parts {
        let shared = &self.shared;
        let mut config = shared.config.clone();
        config.peer_ip = *shared.peer_ip.read();
        Parts {
            config,
            crypto: Arc::clone(shared.codec.crypto()),
            store: Arc::clone(&shared.store),
            link: Arc::clone(&shared.link),
            clock: Arc::clone(&shared.clock),
            outbox: Arc::clone(&shared.outbox),
            observer: Arc::clone(&shared.observer),
            discovery: self.discovery.config().clone(),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    pub fn peer_ip(&self) -> IpAddr {
        *self.shared.peer_ip.read()
    }

    /// Retarget every port at a new address and forget the last probe
    pub fn set_peer_ip(&self, peer_ip: IpAddr) {
        *self.shared.peer_ip.write() = peer_ip;
        self.shared
            .reachability
            .set_target(SocketAddr::new(peer_ip, ports::COMMAND));
        info!("Peer address set to {}", peer_ip);
    }

    pub fn crypto(&self) -> &Arc<dyn CryptoProvider> {
        self.shared.codec.crypto()
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.shared.outbox
    }

    /// Operations currently running on the dispatcher
    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    // ------------------------------------------------------------------
    // Outbound commands
    // ------------------------------------------------------------------

    /// Fire-and-forget signed send with no outbox. Failures reach the observer.
    pub fn send_command(&self, command: impl Into<String>) -> JoinHandle<Result<(), TransportError>> {
        let shared = Arc::clone(&self.shared);
        let command = command.into();
        self.dispatcher
            .submit(async move { shared.send_reported(command).await })
    }

    /// Signed send on the caller's task. `Ok` means the datagram left the device.
    pub async fn send_command_sync(&self, command: &str) -> Result<(), TransportError> {
        self.shared.send_command_sync(command).await
    }

    /// Send if reachable, otherwise (or if the send fails) store for replay
    pub fn send_data_command(&self, command: impl Into<String>) -> JoinHandle<SendOutcome> {
        let shared = Arc::clone(&self.shared);
        let command = command.into();
        debug!("Data command submitted: {}", abbrev(&command));
        self.dispatcher
            .submit(async move { shared.send_data(command).await })
    }

    /// Ask the peer for changes since `tasks_since`. Skipped when unreachable.
    pub fn perform_handshake(&self, tasks_since: &str) -> JoinHandle<HandshakeOutcome> {
        let request = HandshakeRequest::new(tasks_since, self.shared.store.last_chat_sync_ms());
        let shared = Arc::clone(&self.shared);
        self.dispatcher
            .submit(async move { shared.handshake(request).await })
    }

    // ------------------------------------------------------------------
    // Reachability and outbox
    // ------------------------------------------------------------------

    pub async fn is_server_reachable(&self) -> bool {
        self.shared.reachability.is_reachable().await
    }

    /// Last probe result without probing
    pub fn reachability(&self) -> ReachabilityState {
        self.shared.reachability.cached()
    }

    pub fn probe_count(&self) -> u64 {
        self.shared.reachability.probe_count()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.outbox.pending_count()
    }

    /// Replay the outbox in order, stopping at the first failure
    pub fn flush_outbox(&self) -> JoinHandle<FlushReport> {
        let shared = Arc::clone(&self.shared);
        self.dispatcher.submit(async move { shared.flush().await })
    }

    // ------------------------------------------------------------------
    // Companion control
    // ------------------------------------------------------------------

    /// PING/PONG round trip on the command port
    pub async fn test_connection(&self) -> Result<Duration, TransportError> {
        let target = self.shared.target(ports::COMMAND);
        let started = Instant::now();
        let reply = self
            .shared
            .link
            .request(target, PING.as_bytes(), self.shared.config.ping_timeout())
            .await?;

        if is_pong(&reply) {
            let rtt = started.elapsed();
            debug!("Connection test to {}: {:?}", target, rtt);
            Ok(rtt)
        } else {
            Err(TransportError::UnexpectedReply(
                String::from_utf8_lossy(&reply).into_owned(),
            ))
        }
    }

    /// Ask the watchdog to start the companion's main server
    pub fn wake_up_watchdog(&self) -> JoinHandle<Result<(), TransportError>> {
        self.watchdog(protocol::START_MAIN_SERVER)
    }

    /// Start the companion's main server if stopped, stop it if running
    pub fn toggle_server_state(&self, is_running: bool) -> JoinHandle<Result<(), TransportError>> {
        self.watchdog(protocol::toggle_command(is_running))
    }

    fn watchdog(&self, literal: &'static str) -> JoinHandle<Result<(), TransportError>> {
        let shared = Arc::clone(&self.shared);
        self.dispatcher
            .submit(async move { shared.send_watchdog(literal).await })
    }

    /// Request the companion's file listing; the result also goes to the store
    pub async fn fetch_file_list(&self) -> Result<String, TransportError> {
        let shared = &self.shared;
        let packet = shared.codec.encode(protocol::REQUEST_FILE_LIST)?;
        let reply = shared
            .link
            .request(
                shared.target(ports::COMMAND),
                packet.to_wire().as_bytes(),
                shared.config.file_list_timeout(),
            )
            .await?;

        let reply = String::from_utf8_lossy(&reply);
        match protocol::strip_file_list(&reply) {
            Some(listing) => {
                shared.store.on_file_list(listing);
                Ok(listing.to_string())
            }
            None => Err(TransportError::UnexpectedReply(abbrev(&reply))),
        }
    }

    /// Broadcast for companions; resolves after the discovery window
    pub fn discover_servers(&self) -> JoinHandle<HashSet<IpAddr>> {
        let discovery = self.discovery.clone();
        tokio::spawn(async move { discovery.discover().await })
    }

    /// Like `discover_servers`, keeping each companion's reply kind
    pub fn discover_peers(&self) -> JoinHandle<HashMap<IpAddr, DiscoveryReply>> {
        let discovery = self.discovery.clone();
        tokio::spawn(async move { discovery.discover_peers().await })
    }

    // ------------------------------------------------------------------
    // Monitor lifecycle
    // ------------------------------------------------------------------

    /// Start the background monitor. Returns false if one is already running.
    ///
    /// Must be called within a tokio runtime.
    pub fn start_monitor(&self) -> bool {
        let mut monitor = self.monitor.lock();
        if let Some(task) = monitor.as_ref() {
            if !task.handle.is_finished() {
                return false;
            }
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&self.shared).run_monitor(stop_rx));
        *monitor = Some(MonitorTask { stop, handle });
        true
    }

    pub fn is_monitor_running(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    /// Signal the monitor and wait for it to exit
    pub async fn stop_monitor(&self) {
        let task = self.monitor.lock().take();
        if let Some(task) = task {
            let _ = task.stop.send(true);
            if let Err(e) = task.handle.await {
                warn!("Monitor task ended abnormally: {}", e);
            }
        }
    }

    /// Stop the monitor and clear reachability state
    pub async fn shutdown(&self) {
        self.stop_monitor().await;
        self.shared.reachability.reset();
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.monitor.lock().take() {
            let _ = task.stop.send(true);
        }
    }
}
