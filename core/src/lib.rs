// DeskBridge Core — device-side command transport for a desktop companion
//
// Signed (optionally encrypted) UDP commands, a cached reachability probe,
// a durable outbox replayed on reconnect, and LAN discovery, all driven
// through `ConnectionManager`.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod message;
pub mod store;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TransportConfig;
pub use crypto::{CryptoError, CryptoProvider, SharedKeyCrypto};
pub use message::{HandshakeRequest, Packet, PacketCodec, PacketError};
pub use store::{CommandSender, FlushReport, Outbox, OutboxEntry, OutboxError};
pub use transport::{
    ConnectionManager, DatagramLink, DiscoveryConfig, DiscoveryReply, HandshakeOutcome,
    QueueReason, SendOutcome, TracingObserver, TransportError, TransportEvent,
    TransportObserver, UdpLink,
};

/// Domain data the transport reads from and hands results back to.
///
/// Implemented by whatever owns the device's tasks, notes and chat history.
pub trait DomainStore: Send + Sync {
    /// Unix millis of the newest chat message already synced from the peer
    fn last_chat_sync_ms(&self) -> i64;

    /// Companion file listing, `FILE_LIST:` prefix removed
    fn on_file_list(&self, _listing: &str) {}
}

/// Store for front-ends with no local chat history
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyStore;

impl DomainStore for EmptyStore {
    fn last_chat_sync_ms(&self) -> i64 {
        0
    }
}
