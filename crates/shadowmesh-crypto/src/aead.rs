//! ChaCha20-Poly1305 / XChaCha20-Poly1305 AEAD encryption.
//!
//! The data plane uses the 12-byte-nonce `ChaCha20Poly1305` (matched to the
//! session nonce generator's `counter(6) ‖ salt(6)` layout); the keystore
//! uses the 24-byte-nonce `XChaCha20Poly1305` where nonces are drawn fresh
//! from the OS CSPRNG rather than a counter.

use chacha20poly1305::{
 aead::{Aead, KeyInit, Payload},
 ChaCha20Poly1305, XChaCha20Poly1305,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;

/// A 32-byte AEAD key, zeroized on drop and compared in constant time.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AeadKey([u8; 32]);

impl AeadKey {
 /// Wrap raw key bytes.
 #[must_use]
 pub fn new(bytes: [u8; 32]) -> Self {
 Self(bytes)
 }

 /// Borrow the raw key bytes (for re-derivation / serialization only).
 #[must_use]
 pub fn as_bytes(&self) -> &[u8; 32] {
 &self.0
 }
}

impl PartialEq for AeadKey {
 fn eq(&self, other: &Self) -> bool {
 use subtle::ConstantTimeEq;
 self.0.ct_eq(&other.0).into()
 }
}
impl Eq for AeadKey {}

/// Seal `plaintext` under `key`/`nonce` with associated data `aad`.
///
/// Returns `plaintext.len() + 16` bytes (ciphertext plus the 16-byte
/// Poly1305 tag).
///
/// # Errors
/// Returns [`CryptoError::AuthFailure`] only in the (practically
/// unreachable) case the underlying cipher rejects the operation; sealing
/// otherwise never fails.
pub fn aead_seal(
 key: &AeadKey,
 nonce: &[u8; 12],
 aad: &[u8],
 plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
 let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
 cipher
.encrypt(nonce.into(), Payload { msg: plaintext, aad })
.map_err(|_| CryptoError::AuthFailure)
}

/// Open a frame sealed by [`aead_seal`].
///
/// # Errors
/// Returns [`CryptoError::AuthFailure`] if the tag does not verify or `aad`
/// does not match what was sealed.
pub fn aead_open(
 key: &AeadKey,
 nonce: &[u8; 12],
 aad: &[u8],
 ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
 let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
 cipher
.decrypt(nonce.into(), Payload { msg: ciphertext, aad })
.map_err(|_| CryptoError::AuthFailure)
}

/// Seal with the extended 24-byte-nonce variant, used for the keystore file
/// where nonces are random rather than counter-derived.
///
/// # Errors
/// Returns [`CryptoError::AuthFailure`] on the (practically unreachable)
/// encryption failure path.
pub fn xaead_seal(
 key: &AeadKey,
 nonce: &[u8; 24],
 aad: &[u8],
 plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
 let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
 cipher
.encrypt(nonce.into(), Payload { msg: plaintext, aad })
.map_err(|_| CryptoError::AuthFailure)
}

/// Open a keystore record sealed by [`xaead_seal`].
///
/// # Errors
/// Returns [`CryptoError::AuthFailure`] if the tag does not verify.
pub fn xaead_open(
 key: &AeadKey,
 nonce: &[u8; 24],
 aad: &[u8],
 ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
 let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
 cipher
.decrypt(nonce.into(), Payload { msg: ciphertext, aad })
.map_err(|_| CryptoError::AuthFailure)
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn seal_open_roundtrip() {
 let key = AeadKey::new([0x42u8; 32]);
 let nonce = [0u8; 12];
 let plaintext = b"shadowmesh data frame";
 let aad = b"frame header";

 let ct = aead_seal(&key, &nonce, aad, plaintext).unwrap();
 assert_eq!(ct.len(), plaintext.len() + 16);
 let pt = aead_open(&key, &nonce, aad, &ct).unwrap();
 assert_eq!(pt, plaintext);
 }

 #[test]
 fn tampered_ciphertext_fails_to_open() {
 let key = AeadKey::new([0x11u8; 32]);
 let nonce = [0u8; 12];
 let mut ct = aead_seal(&key, &nonce, b"aad", b"payload").unwrap();
 ct[0] ^= 0xFF;
 assert!(matches!(
 aead_open(&key, &nonce, b"aad", &ct),
 Err(CryptoError::AuthFailure)
 ));
 }

 #[test]
 fn mismatched_aad_fails_to_open() {
 let key = AeadKey::new([0x22u8; 32]);
 let nonce = [0u8; 12];
 let ct = aead_seal(&key, &nonce, b"aad-a", b"payload").unwrap();
 assert!(matches!(
 aead_open(&key, &nonce, b"aad-b", &ct),
 Err(CryptoError::AuthFailure)
 ));
 }

 #[test]
 fn wrong_key_fails_to_open() {
 let key_a = AeadKey::new([0x33u8; 32]);
 let key_b = AeadKey::new([0x34u8; 32]);
 let nonce = [0u8; 12];
 let ct = aead_seal(&key_a, &nonce, b"aad", b"payload").unwrap();
 assert!(aead_open(&key_b, &nonce, b"aad", &ct).is_err());
 }

 #[test]
 fn tx_key_never_equals_rx_key_in_practice() {
 let tx = AeadKey::new([0x01u8; 32]);
 let rx = AeadKey::new([0x02u8; 32]);
 assert_ne!(tx, rx);
 }

 #[test]
 fn xaead_roundtrip() {
 let key = AeadKey::new([0x55u8; 32]);
 let nonce = [0u8; 24];
 let ct = xaead_seal(&key, &nonce, b"keystore", b"secret material").unwrap();
 let pt = xaead_open(&key, &nonce, b"keystore", &ct).unwrap();
 assert_eq!(pt, b"secret material");
 }
}
