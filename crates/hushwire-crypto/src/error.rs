//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors from key handling and message encryption.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key material is malformed or internally inconsistent
    #[error("invalid key pair: {reason}")]
    InvalidKeyPair {
        /// What made the material unusable
        reason: String,
    },

    /// Ciphertext could not be decrypted with the derived key
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// What went wrong (encoding, IV shape, padding)
        reason: String,
    },
}
