// Packet and handshake types — what actually goes on the wire

use crate::crypto::CryptoError;
use chrono::NaiveDateTime;
use thiserror::Error;

use super::protocol::SYNC_HANDSHAKE_PREFIX;

/// Largest payload a single UDP datagram can carry over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Timestamp format used by `tasks_since`
pub const TASKS_SINCE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// `tasks_since` value that requests the full task set
pub const EPOCH_TASKS_SINCE: &str = "1970-01-01T00:00:00";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("Malformed packet: {0}")]
    Malformed(String),
    #[error("Invalid packet timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("Packet signature mismatch")]
    Authentication,
    #[error("Encoded packet too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// A signed command packet.
///
/// Wire form is `body|timestamp|signature`. `body` is the ciphertext when
/// encryption is on, otherwise the raw command. The signature always covers
/// `body|timestamp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub body: String,
    /// Unix seconds at construction
    pub timestamp: i64,
    pub signature: String,
}

impl Packet {
    /// The exact string the signature is computed over
    pub fn signed_message(body: &str, timestamp: i64) -> String {
        format!("{}|{}", body, timestamp)
    }

    pub fn to_wire(&self) -> String {
        format!("{}|{}|{}", self.body, self.timestamp, self.signature)
    }

    /// Split a received datagram into its three parts.
    ///
    /// Splits from the right so a clear-text body may contain `|` itself.
    /// Does not check the signature; see `PacketCodec::decode`.
    pub fn parse(wire: &str) -> Result<Self, PacketError> {
        let wire = wire.trim_end_matches(&['\r', '\n'][..]);
        let mut parts = wire.rsplitn(3, '|');

        let (Some(signature), Some(timestamp), Some(body)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(PacketError::Malformed(
                "expected BODY|TIMESTAMP|SIGNATURE".to_string(),
            ));
        };

        if signature.is_empty() {
            return Err(PacketError::Malformed("empty signature".to_string()));
        }

        let timestamp = timestamp
            .parse::<i64>()
            .map_err(|_| PacketError::InvalidTimestamp(timestamp.to_string()))?;

        Ok(Self {
            body: body.to_string(),
            timestamp,
            signature: signature.to_string(),
        })
    }
}

/// Request for an incremental state delta.
///
/// Encoded as `SYNC_HANDSHAKE:tasks_since=<ISO8601>,chat_since=<epoch-ms>`.
/// The peer answers with `SYNC_DELTA:{...}`, which the domain layer consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub tasks_since: String,
    pub chat_since: i64,
}

impl HandshakeRequest {
    pub fn new(tasks_since: impl Into<String>, chat_since: i64) -> Self {
        Self {
            tasks_since: tasks_since.into(),
            chat_since,
        }
    }

    pub fn since(tasks_since: NaiveDateTime, chat_since: i64) -> Self {
        Self::new(tasks_since.format(TASKS_SINCE_FORMAT).to_string(), chat_since)
    }

    pub fn to_command(&self) -> String {
        format!(
            "{}tasks_since={},chat_since={}",
            SYNC_HANDSHAKE_PREFIX, self.tasks_since, self.chat_since
        )
    }

    /// Parse a handshake command string (peer side, tests)
    pub fn parse(command: &str) -> Option<Self> {
        let fields = command.strip_prefix(SYNC_HANDSHAKE_PREFIX)?;
        let (tasks, chat) = fields.split_once(',')?;
        let tasks_since = tasks.strip_prefix("tasks_since=")?;
        let chat_since = chat.strip_prefix("chat_since=")?.parse().ok()?;
        Some(Self::new(tasks_since, chat_since))
    }

    pub fn tasks_since_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.tasks_since, TASKS_SINCE_FORMAT).ok()
    }
}
