//! Transport abstraction layer
//!
//! Defines the error and event types shared by the connection manager, the
//! seam to the datagram network (`DatagramLink`) and the observer that
//! receives failures the caller never sees.

use crate::message::protocol::abbrev;
use crate::message::PacketError;
use crate::store::{FlushReport, OutboxError};
use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Socket error: {0}")]
    Io(String),
    #[error("No reply within {0:?}")]
    Timeout(Duration),
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Outbox(#[from] OutboxError),
    #[error("Background task failed: {0}")]
    Task(String),
}

impl TransportError {
    /// The command itself cannot be encoded; retrying it will never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, TransportError::Packet(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Why a data command went to the outbox instead of the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueReason {
    /// The reachability probe said the peer is down
    Unreachable,
    /// The peer looked reachable but the local send failed
    SendFailed,
}

impl fmt::Display for QueueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueReason::Unreachable => write!(f, "peer unreachable"),
            QueueReason::SendFailed => write!(f, "send failed"),
        }
    }
}

/// Everything the transport does on the caller's behalf without telling it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A signed packet left the device
    CommandSent { command: String },
    /// A direct send failed
    SendFailed {
        command: String,
        error: TransportError,
    },
    /// A data command was stored for later replay
    CommandQueued { command: String, reason: QueueReason },
    /// A data command was discarded: it cannot be encoded, or the outbox
    /// refused it
    CommandDropped {
        command: String,
        error: TransportError,
    },
    HandshakeSent { command: String },
    /// Handshake not attempted because the peer is unreachable
    HandshakeSkipped,
    ReachabilityChanged { reachable: bool },
    FlushCompleted(FlushReport),
    MonitorStarted,
    MonitorStopped,
}

/// Receives transport events. Must not block.
pub trait TransportObserver: Send + Sync {
    fn on_event(&self, event: &TransportEvent);
}

/// Default observer: writes events to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TransportObserver for TracingObserver {
    fn on_event(&self, event: &TransportEvent) {
        match event {
            TransportEvent::CommandSent { command } => debug!("Sent: {}", abbrev(command)),
            TransportEvent::SendFailed { command, error } => {
                warn!("Send failed for {}: {}", abbrev(command), error)
            }
            TransportEvent::CommandQueued { command, reason } => {
                info!("Queued ({}): {}", reason, abbrev(command))
            }
            TransportEvent::CommandDropped { command, error } => {
                warn!("Dropped {}: {}", abbrev(command), error)
            }
            TransportEvent::HandshakeSent { command } => info!("Handshake sent: {}", command),
            TransportEvent::HandshakeSkipped => warn!("Handshake skipped — server unreachable"),
            TransportEvent::ReachabilityChanged { reachable } => {
                info!("Server {}", if *reachable { "reachable" } else { "unreachable" })
            }
            TransportEvent::FlushCompleted(report) => debug!("Flush completed: {:?}", report),
            TransportEvent::MonitorStarted => debug!("Connection monitor started"),
            TransportEvent::MonitorStopped => debug!("Connection monitor stopped"),
        }
    }
}

/// Datagram network seam.
///
/// Every call uses its own short-lived socket; nothing is held open between
/// calls.
#[async_trait]
pub trait DatagramLink: Send + Sync {
    /// Fire one datagram at `target`
    async fn send(&self, target: SocketAddr, payload: &[u8]) -> Result<(), TransportError>;

    /// Send one datagram and wait up to `timeout` for a single reply
    async fn request(
        &self,
        target: SocketAddr,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let err: TransportError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(matches!(err, TransportError::Io(_)));
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_packet_error_is_transparent() {
        let err: TransportError = PacketError::Authentication.into();
        assert_eq!(err.to_string(), "Packet signature mismatch");
    }

    #[test]
    fn test_only_encoding_errors_are_permanent() {
        let too_large: TransportError = PacketError::TooLarge {
            size: 70_000,
            max: 65_507,
        }
        .into();
        assert!(too_large.is_permanent());
        assert!(!TransportError::Io("unreachable".to_string()).is_permanent());
        assert!(!TransportError::Timeout(Duration::from_millis(500)).is_permanent());
        assert!(!TransportError::Outbox(OutboxError::Full(1)).is_permanent());
    }

    #[test]
    fn test_queue_reason_display() {
        assert_eq!(QueueReason::Unreachable.to_string(), "peer unreachable");
        assert_eq!(QueueReason::SendFailed.to_string(), "send failed");
    }
}
