//! Long-term X25519 identity key pairs.
//!
//! One pair per account, created at registration and persisted by the caller
//! as two hex strings. Key generation takes a caller-provided seed so the
//! randomness source stays outside this crate.

use std::fmt;

use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CryptoError;

/// Size of X25519 private and public keys in bytes.
pub const KEY_SIZE: usize = 32;

/// A long-term X25519 key pair identifying one account.
#[derive(Clone)]
pub struct IdentityKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl IdentityKeyPair {
    /// Create a key pair from 32 caller-provided random bytes.
    ///
    /// # Security
    /// The seed MUST come from a cryptographically secure source in
    /// production; deterministic seeds are for tests only.
    pub fn generate(seed: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(seed);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a key pair from a hex-encoded private key.
    ///
    /// # Errors
    /// Returns [`CryptoError::InvalidKeyPair`] if the hex does not decode to
    /// exactly [`KEY_SIZE`] bytes.
    pub fn from_private_hex(private_hex: &str) -> Result<Self, CryptoError> {
        Ok(Self::generate(decode_key_hex(private_hex, "private key")?))
    }

    /// The public half.
    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// Raw public key bytes.
    pub fn public_bytes(&self) -> [u8; KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Hex-encoded public key (64 lowercase characters).
    pub fn public_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    /// Hex-encoded private key (64 lowercase characters).
    ///
    /// # Security
    /// The output is secret key material; hand it only to the key store.
    pub fn private_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    pub(crate) fn diffie_hellman(&self, peer: &PublicKey) -> x25519_dalek::SharedSecret {
        self.secret.diffie_hellman(peer)
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public_hex())
            .field("secret", &"[redacted]")
            .finish()
    }
}

/// Parse a hex-encoded X25519 public key.
///
/// # Errors
/// Returns [`CryptoError::InvalidKeyPair`] if the hex does not decode to
/// exactly [`KEY_SIZE`] bytes.
pub fn public_key_from_hex(public_hex: &str) -> Result<PublicKey, CryptoError> {
    Ok(PublicKey::from(decode_key_hex(public_hex, "public key")?))
}

/// True when `bytes` has the shape of an X25519 public key.
///
/// Any 32-byte string is a valid point input for X25519, so only the length
/// is checked.
pub fn validate_public_key(bytes: &[u8]) -> bool {
    bytes.len() == KEY_SIZE
}

/// True when `private` derives exactly the claimed `public` key.
///
/// Malformed input reads as `false`; this never errors.
pub fn validate_key_pair(private: &[u8], public: &[u8]) -> bool {
    let Ok(private) = <[u8; KEY_SIZE]>::try_from(private) else {
        return false;
    };
    if !validate_public_key(public) {
        return false;
    }
    let derived = PublicKey::from(&StaticSecret::from(private));
    derived.as_bytes().as_slice() == public
}

fn decode_key_hex(key_hex: &str, what: &str) -> Result<[u8; KEY_SIZE], CryptoError> {
    let bytes = hex::decode(key_hex).map_err(|e| CryptoError::InvalidKeyPair {
        reason: format!("{what} is not valid hex: {e}"),
    })?;
    <[u8; KEY_SIZE]>::try_from(bytes.as_slice()).map_err(|_| CryptoError::InvalidKeyPair {
        reason: format!("{what} must be {KEY_SIZE} bytes, got {}", bytes.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(value: u8) -> [u8; KEY_SIZE] {
        [value; KEY_SIZE]
    }

    #[test]
    fn generated_pair_is_self_consistent() {
        let pair = IdentityKeyPair::generate(seed(1));

        assert_eq!(pair.public_bytes().len(), KEY_SIZE);
        assert_eq!(pair.public_hex().len(), KEY_SIZE * 2);
        assert!(validate_key_pair(
            &hex::decode(pair.private_hex()).unwrap(),
            &pair.public_bytes()
        ));
    }

    #[test]
    fn distinct_seeds_give_distinct_keys() {
        let a = IdentityKeyPair::generate(seed(1));
        let b = IdentityKeyPair::generate(seed(2));

        assert_ne!(a.public_bytes(), b.public_bytes());
    }

    #[test]
    fn private_hex_round_trips() {
        let original = IdentityKeyPair::generate(seed(7));

        let restored = IdentityKeyPair::from_private_hex(&original.private_hex()).unwrap();

        assert_eq!(restored.public_bytes(), original.public_bytes());
        assert_eq!(restored.private_hex(), original.private_hex());
    }

    #[test]
    fn from_private_hex_rejects_bad_input() {
        assert!(matches!(
            IdentityKeyPair::from_private_hex("not hex at all"),
            Err(CryptoError::InvalidKeyPair { .. })
        ));
        // Valid hex, wrong length
        assert!(matches!(
            IdentityKeyPair::from_private_hex("deadbeef"),
            Err(CryptoError::InvalidKeyPair { .. })
        ));
    }

    #[test]
    fn public_key_from_hex_round_trips() {
        let pair = IdentityKeyPair::generate(seed(9));

        let parsed = public_key_from_hex(&pair.public_hex()).unwrap();

        assert_eq!(parsed, *pair.public());
    }

    #[test]
    fn public_key_from_hex_accepts_uppercase() {
        let pair = IdentityKeyPair::generate(seed(9));

        let parsed = public_key_from_hex(&pair.public_hex().to_uppercase()).unwrap();

        assert_eq!(parsed, *pair.public());
    }

    #[test]
    fn validate_public_key_checks_length_only() {
        assert!(validate_public_key(&[0u8; 32]));
        assert!(!validate_public_key(&[0u8; 31]));
        assert!(!validate_public_key(&[0u8; 33]));
        assert!(!validate_public_key(&[]));
    }

    #[test]
    fn validate_key_pair_rejects_mismatched_halves() {
        let a = IdentityKeyPair::generate(seed(1));
        let b = IdentityKeyPair::generate(seed(2));

        let a_private = hex::decode(a.private_hex()).unwrap();
        assert!(validate_key_pair(&a_private, &a.public_bytes()));
        assert!(!validate_key_pair(&a_private, &b.public_bytes()));
        assert!(!validate_key_pair(&a_private[..16], &a.public_bytes()));
    }

    #[test]
    fn debug_output_redacts_private_key() {
        let pair = IdentityKeyPair::generate(seed(3));

        let rendered = format!("{pair:?}");

        assert!(rendered.contains(&pair.public_hex()));
        assert!(!rendered.contains(&pair.private_hex()));
        assert!(rendered.contains("[redacted]"));
    }
}
