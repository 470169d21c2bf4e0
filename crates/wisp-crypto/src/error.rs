//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (authentication failure)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid nonce length
    #[error("invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Message too short to carry an authentication tag
    #[error("message too short for authentication tag")]
    MessageTooShort,

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// Nonce counter exhausted
    #[error("nonce counter exhausted")]
    NonceOverflow,

    /// Replay detected (duplicate salt or packet id)
    #[error("replay detected")]
    ReplayDetected,

    /// Method name not in the supported menu
    #[error("unknown method: {0}")]
    UnknownMethod(String),
}
