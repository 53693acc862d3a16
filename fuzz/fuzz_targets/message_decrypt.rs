//! Fuzz target for the inbound decryption path
//!
//! Nonce, ephemeral key, and ciphertext all arrive from the relay as
//! attacker-influenced hex strings.
//!
//! # Strategy
//!
//! - Arbitrary wire fields through the hex parsers
//! - Arbitrary ciphertext under a genuinely derived key
//! - A real encrypt/decrypt round trip as the control group
//!
//! # Invariants
//!
//! - Key and IV parsing reject bad input with an error, never a panic
//! - Decryption never panics, whatever the ciphertext
//! - Key derivation is symmetric between the two sides of a session
//! - Honest ciphertext under the derived key always round-trips

#![no_main]

use arbitrary::Arbitrary;
use hushwire_crypto::{
    IV_SIZE, IdentityKeyPair, KEY_SIZE, decrypt, derive_message_key, encrypt,
    ephemeral_public_key, establish, iv_from_hex, public_key_from_hex,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct DecryptScenario {
    /// `ephemeral_key` field as it came off the wire
    ephemeral_hex: String,
    /// `nonce` field as it came off the wire
    nonce_hex: String,
    /// `message` field as it came off the wire
    ciphertext_hex: String,
    /// Seeds for deterministic key material
    local_seed: [u8; KEY_SIZE],
    peer_seed: [u8; KEY_SIZE],
    ephemeral_seed: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
    /// Plaintext for the round-trip check
    plaintext: Vec<u8>,
}

fuzz_target!(|scenario: DecryptScenario| {
    // INVARIANT 1: wire-field parsing never panics
    let _ = public_key_from_hex(&scenario.ephemeral_hex);
    let _ = iv_from_hex(&scenario.nonce_hex);

    let local = IdentityKeyPair::generate(scenario.local_seed);
    let peer = IdentityKeyPair::generate(scenario.peer_seed);
    let secret = establish(&local, peer.public());

    // INVARIANT 2: both sides derive the same message key
    let ephemeral = ephemeral_public_key(scenario.ephemeral_seed);
    let key = derive_message_key(&secret, &ephemeral);
    let peer_secret = establish(&peer, local.public());
    let peer_key = derive_message_key(&peer_secret, &ephemeral);
    assert_eq!(key.as_bytes(), peer_key.as_bytes(), "derivation must be symmetric");

    // INVARIANT 3: arbitrary ciphertext under a real key errors or decodes
    // to garbage, but never panics
    let _ = decrypt(&scenario.ciphertext_hex, &key, &scenario.iv);

    // INVARIANT 4: honest ciphertext always round-trips
    let ciphertext = encrypt(&scenario.plaintext, &key, &scenario.iv);
    let recovered = decrypt(&ciphertext, &key, &scenario.iv);
    assert_eq!(
        recovered.as_deref().ok(),
        Some(scenario.plaintext.as_slice()),
        "round trip must restore the plaintext"
    );
});
