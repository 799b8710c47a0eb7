// Pairing payload import
//
// The desktop control panel shows a QR code holding a small JSON document;
// its text is pasted into `deskbridge pair`. Port fields in the payload are
// accepted but ignored: the port layout is fixed.

use crate::config::Config;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::IpAddr;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PairingPayload {
    pub ip: IpAddr,
    #[serde(default)]
    pub hostname: Option<String>,
    pub aes_key: String,
    pub hmac_key: String,
    #[serde(default = "default_encryption")]
    pub encryption: bool,
}

fn default_encryption() -> bool {
    true
}

impl PairingPayload {
    pub fn parse(json: &str) -> Result<Self> {
        let payload: PairingPayload =
            serde_json::from_str(json.trim()).context("Invalid pairing payload")?;
        anyhow::ensure!(!payload.aes_key.is_empty(), "Pairing payload has an empty aes_key");
        anyhow::ensure!(!payload.hmac_key.is_empty(), "Pairing payload has an empty hmac_key");
        Ok(payload)
    }

    pub fn apply(self, config: &mut Config) {
        config.transport.peer_ip = self.ip;
        config.hostname = self.hostname;
        config.cipher_secret = self.aes_key;
        config.mac_secret = self.hmac_key;
        config.encryption = self.encryption;
    }
}
