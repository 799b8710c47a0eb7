// Packet codec — sign (and optionally encrypt) commands, verify received packets

use super::types::{Packet, PacketError, MAX_DATAGRAM_SIZE};
use crate::clock::Clock;
use crate::crypto::CryptoProvider;
use std::sync::Arc;

/// Builds authenticated packets from command strings and checks incoming ones.
///
/// Pure transformation: no I/O happens here.
#[derive(Clone)]
pub struct PacketCodec {
    crypto: Arc<dyn CryptoProvider>,
    clock: Arc<dyn Clock>,
}

impl PacketCodec {
    pub fn new(crypto: Arc<dyn CryptoProvider>, clock: Arc<dyn Clock>) -> Self {
        Self { crypto, clock }
    }

    pub fn crypto(&self) -> &Arc<dyn CryptoProvider> {
        &self.crypto
    }

    /// Encode a command stamped with the current time
    pub fn encode(&self, command: &str) -> Result<Packet, PacketError> {
        self.encode_at(command, self.clock.unix_secs())
    }

    /// Encode a command with an explicit timestamp
    pub fn encode_at(&self, command: &str, timestamp: i64) -> Result<Packet, PacketError> {
        let body = if self.crypto.encryption_enabled() {
            self.crypto.encrypt(command)?
        } else {
            command.to_string()
        };

        let signature = self
            .crypto
            .sign(&Packet::signed_message(&body, timestamp))?;

        let packet = Packet {
            body,
            timestamp,
            signature,
        };

        let size = packet.to_wire().len();
        if size > MAX_DATAGRAM_SIZE {
            return Err(PacketError::TooLarge {
                size,
                max: MAX_DATAGRAM_SIZE,
            });
        }

        Ok(packet)
    }

    /// Parse a received packet and verify its signature.
    ///
    /// Returns the body as received (still encrypted if the sender encrypted
    /// it) together with its timestamp.
    pub fn decode(&self, wire: &str) -> Result<(String, i64), PacketError> {
        let packet = Packet::parse(wire)?;
        let message = Packet::signed_message(&packet.body, packet.timestamp);

        if !self.crypto.verify(&message, &packet.signature)? {
            return Err(PacketError::Authentication);
        }

        Ok((packet.body, packet.timestamp))
    }

    /// Decode and, when encryption is on, decrypt back to the command
    pub fn open(&self, wire: &str) -> Result<String, PacketError> {
        let (body, _) = self.decode(wire)?;
        if self.crypto.encryption_enabled() {
            Ok(self.crypto.decrypt(&body)?)
        } else {
            Ok(body)
        }
    }
}
