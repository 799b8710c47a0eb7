// Pairing-secret crypto: XChaCha20-Poly1305 bodies + HMAC-SHA256 signatures
//
// Flow:
// 1. Both sides hold the same two pairing secrets (exchanged via QR at setup)
// 2. KDF: Blake3::derive_key(context, secret) → 32-byte cipher key / mac key
// 3. Encrypt: XChaCha20-Poly1305(cipher_key, random_nonce, command)
// 4. Body text: hex(nonce || ciphertext), never contains '|'
// 5. Sign: HMAC-SHA256(mac_key, "body|timestamp") → lower-case hex

use super::{CryptoError, CryptoProvider};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// KDF context strings. Changing either breaks compatibility with paired peers.
const CIPHER_KDF_CONTEXT: &str = "deskbridge command body encryption 2025-01-12";
const MAC_KDF_CONTEXT: &str = "deskbridge command packet signature 2025-01-12";

const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

#[derive(Zeroize, ZeroizeOnDrop)]
struct KeyMaterial {
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
}

/// Crypto provider keyed from the two pairing secrets.
pub struct SharedKeyCrypto {
    keys: KeyMaterial,
    encryption: AtomicBool,
}

impl SharedKeyCrypto {
    /// Derive both keys from the pairing secrets. Encryption starts enabled.
    pub fn from_secrets(cipher_secret: &str, mac_secret: &str) -> Self {
        Self {
            keys: KeyMaterial {
                cipher_key: blake3::derive_key(CIPHER_KDF_CONTEXT, cipher_secret.as_bytes()),
                mac_key: blake3::derive_key(MAC_KDF_CONTEXT, mac_secret.as_bytes()),
            },
            encryption: AtomicBool::new(true),
        }
    }

    /// Builder-style toggle
    pub fn with_encryption(self, enabled: bool) -> Self {
        self.encryption.store(enabled, Ordering::SeqCst);
        self
    }

    fn mac(&self) -> Result<HmacSha256, CryptoError> {
        <HmacSha256 as Mac>::new_from_slice(&self.keys.mac_key)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))
    }

    fn cipher(&self) -> Result<XChaCha20Poly1305, CryptoError> {
        <XChaCha20Poly1305 as KeyInit>::new_from_slice(&self.keys.cipher_key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }
}

impl fmt::Debug for SharedKeyCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKeyCrypto")
            .field("encryption", &self.encryption_enabled())
            .finish_non_exhaustive()
    }
}

impl CryptoProvider for SharedKeyCrypto {
    fn encryption_enabled(&self) -> bool {
        self.encryption.load(Ordering::SeqCst)
    }

    fn set_encryption_enabled(&self, enabled: bool) {
        self.encryption.store(enabled, Ordering::SeqCst);
    }

    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher = self.cipher()?;

        // Fresh nonce per packet
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(hex::encode(combined))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let combined = hex::decode(ciphertext).map_err(|_| CryptoError::InvalidEncoding)?;
        if combined.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::InvalidEncoding);
        }

        let (nonce_bytes, sealed) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()?
            .decrypt(XNonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
    }

    fn sign(&self, message: &str) -> Result<String, CryptoError> {
        let mut mac = self.mac()?;
        mac.update(message.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn verify(&self, message: &str, signature: &str) -> Result<bool, CryptoError> {
        let Ok(expected) = hex::decode(signature) else {
            return Ok(false);
        };
        let mut mac = self.mac()?;
        mac.update(message.as_bytes());
        // Constant-time comparison
        Ok(mac.verify_slice(&expected).is_ok())
    }
}
