// Cryptography module — packet body encryption and signing
//
// The transport only needs four primitives from its crypto collaborator:
// encrypt/decrypt the command body and sign/verify `body|timestamp`.
// Anything implementing `CryptoProvider` can be plugged in; `SharedKeyCrypto`
// is the pairing-secret implementation used by the CLI.

pub mod encrypt;

pub use encrypt::SharedKeyCrypto;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Invalid ciphertext encoding")]
    InvalidEncoding,
    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

/// Crypto collaborator used by the packet codec.
///
/// Encryption can be switched off at runtime (clear-text debugging, peers
/// without the cipher key); signing is always applied.
pub trait CryptoProvider: Send + Sync {
    /// Whether command bodies are encrypted before signing
    fn encryption_enabled(&self) -> bool;

    fn set_encryption_enabled(&self, enabled: bool);

    /// Encrypt a command into a `|`-free text body
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError>;

    /// Signature over `message`, as lower-case hex
    fn sign(&self, message: &str) -> Result<String, CryptoError>;

    /// Check a received signature. The default recomputes and compares.
    fn verify(&self, message: &str, signature: &str) -> Result<bool, CryptoError> {
        Ok(self.sign(message)? == signature)
    }
}
