//! AES-256-CBC message encryption.
//!
//! Hex-encoded ciphertext with PKCS#7 padding and a caller-supplied 16-byte
//! IV, matching the wire format peers already speak. CBC carries no
//! integrity tag: a wrong key or tampered ciphertext surfaces, at best, as a
//! padding error.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};

use crate::{error::CryptoError, session::MessageKey};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Size of the CBC initialization vector in bytes.
pub const IV_SIZE: usize = 16;

/// Encrypt a message under a single-use key.
///
/// The IV must be fresh random bytes for every message and is transmitted
/// alongside the ciphertext. Returns lowercase hex.
pub fn encrypt(plaintext: &[u8], key: &MessageKey, iv: &[u8; IV_SIZE]) -> String {
    let ciphertext = Aes256CbcEnc::new(key.as_bytes().into(), iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    hex::encode(ciphertext)
}

/// Decrypt a hex-encoded ciphertext.
///
/// # Errors
/// Returns [`CryptoError::DecryptionFailed`] when the hex or the PKCS#7
/// padding is malformed. A wrong key or IV usually shows up here, but CBC
/// gives no guarantee; callers must not treat success as authenticity.
pub fn decrypt(
    ciphertext_hex: &str,
    key: &MessageKey,
    iv: &[u8; IV_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let ciphertext = hex::decode(ciphertext_hex).map_err(|e| CryptoError::DecryptionFailed {
        reason: format!("ciphertext is not valid hex: {e}"),
    })?;

    Aes256CbcDec::new(key.as_bytes().into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed {
            reason: "bad padding".to_string(),
        })
}

/// Parse a hex-encoded CBC initialization vector.
///
/// # Errors
/// Returns [`CryptoError::DecryptionFailed`] if the hex does not decode to
/// exactly [`IV_SIZE`] bytes.
pub fn iv_from_hex(iv_hex: &str) -> Result<[u8; IV_SIZE], CryptoError> {
    let bytes = hex::decode(iv_hex).map_err(|e| CryptoError::DecryptionFailed {
        reason: format!("IV is not valid hex: {e}"),
    })?;
    <[u8; IV_SIZE]>::try_from(bytes.as_slice()).map_err(|_| CryptoError::DecryptionFailed {
        reason: format!("IV must be {IV_SIZE} bytes, got {}", bytes.len()),
    })
}
