//! ML-KEM-1024 key encapsulation for the handshake's ephemeral exchange.

use pqcrypto_mlkem::mlkem1024::{self, Ciphertext, PublicKey, SecretKey};
use pqcrypto_traits::kem::{
 Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
};
use zeroize::{Zeroize, Zeroizing};

use crate::CryptoError;

/// Size in bytes of an encoded ML-KEM-1024 public key.
pub fn kem_public_key_size() -> usize {
 mlkem1024::public_key_bytes()
}

/// Size in bytes of an encoded ML-KEM-1024 ciphertext.
pub fn kem_ciphertext_size() -> usize {
 mlkem1024::ciphertext_bytes()
}

/// Size in bytes of the raw shared secret produced by encapsulation.
pub const KEM_SHARED_SECRET_SIZE: usize = 32;

/// Ephemeral ML-KEM-1024 public key, exchanged in the clear during the
/// handshake.
#[derive(Clone)]
pub struct KemPublicKey(PublicKey);

impl PartialEq for KemPublicKey {
 fn eq(&self, other: &Self) -> bool {
 self.as_bytes() == other.as_bytes()
 }
}

impl Eq for KemPublicKey {}

/// Ephemeral ML-KEM-1024 secret key. Held only for the lifetime of a single
/// handshake and zeroized on drop.
///
/// The underlying `pqcrypto` secret key type exposes no mutable byte view,
/// so the raw encoding is kept in a [`Zeroizing`] buffer and the concrete
/// key is reconstructed on each decapsulation rather than held live.
pub struct KemSecretKey(Zeroizing<Vec<u8>>);

/// ML-KEM-1024 ciphertext encapsulating the shared secret to the
/// initiator's ephemeral public key.
#[derive(Clone)]
pub struct KemCiphertext(Ciphertext);

impl PartialEq for KemCiphertext {
 fn eq(&self, other: &Self) -> bool {
 self.as_bytes() == other.as_bytes()
 }
}

impl Eq for KemCiphertext {}

/// A 32-byte shared secret produced by the KEM. Fed into HKDF, never used
/// directly as a symmetric key.
pub struct SharedSecret([u8; KEM_SHARED_SECRET_SIZE]);

impl SharedSecret {
 /// Borrow the raw shared secret bytes.
 #[must_use]
 pub fn as_bytes(&self) -> &[u8; KEM_SHARED_SECRET_SIZE] {
 &self.0
 }
}

impl Drop for SharedSecret {
 fn drop(&mut self) {
 self.0.zeroize();
 }
}

impl KemPublicKey {
 /// Encode as bytes for wire transmission.
 #[must_use]
 pub fn as_bytes(&self) -> &[u8] {
 self.0.as_bytes()
 }

 /// Decode from wire bytes.
 ///
 /// # Errors
 /// Returns [`CryptoError::KeySizeMismatch`] if `bytes` is not exactly
 /// `kem_public_key_size` long or is otherwise malformed.
 pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
 if bytes.len() != kem_public_key_size() {
 return Err(CryptoError::KeySizeMismatch {
 expected: kem_public_key_size(),
 actual: bytes.len(),
 });
 }
 PublicKey::from_bytes(bytes)
.map(Self)
.map_err(|_| CryptoError::KeySizeMismatch {
 expected: kem_public_key_size(),
 actual: bytes.len(),
 })
 }
}

impl KemCiphertext {
 /// Encode as bytes for wire transmission.
 #[must_use]
 pub fn as_bytes(&self) -> &[u8] {
 self.0.as_bytes()
 }

 /// Decode from wire bytes.
 ///
 /// # Errors
 /// Returns [`CryptoError::KeySizeMismatch`] if `bytes` is not exactly
 /// `kem_ciphertext_size` long.
 pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
 if bytes.len() != kem_ciphertext_size() {
 return Err(CryptoError::KeySizeMismatch {
 expected: kem_ciphertext_size(),
 actual: bytes.len(),
 });
 }
 Ciphertext::from_bytes(bytes)
.map(Self)
.map_err(|_| CryptoError::KeySizeMismatch {
 expected: kem_ciphertext_size(),
 actual: bytes.len(),
 })
 }
}

/// Generate a fresh ephemeral ML-KEM-1024 keypair.
///
/// Called once per handshake by the initiator; never persisted.
#[must_use]
pub fn kem_keygen() -> (KemPublicKey, KemSecretKey) {
 let (pk, sk) = mlkem1024::keypair();
 let sk_bytes = Zeroizing::new(sk.as_bytes().to_vec());
 (KemPublicKey(pk), KemSecretKey(sk_bytes))
}

/// Encapsulate a fresh shared secret to `public_key`.
///
/// Called by the responder against the initiator's ephemeral KEM public
/// key received in HELLO.
#[must_use]
pub fn kem_encapsulate(public_key: &KemPublicKey) -> (KemCiphertext, SharedSecret) {
 let (shared_secret, ciphertext) = mlkem1024::encapsulate(&public_key.0);
 let mut out = [0u8; KEM_SHARED_SECRET_SIZE];
 out.copy_from_slice(shared_secret.as_bytes());
 (KemCiphertext(ciphertext), SharedSecret(out))
}

/// Decapsulate `ciphertext` using the initiator's ephemeral secret key.
///
/// # Errors
/// Returns [`CryptoError::DecapsulationFailure`] if decapsulation fails.
/// Note that ML-KEM decapsulation is implicitly rejecting: malformed
/// ciphertexts still "succeed" and return a pseudorandom secret rather than
/// raising an error, so this only fails on malformed/short ciphertext
/// encodings caught earlier in [`KemCiphertext::from_bytes`].
pub fn kem_decapsulate(
 secret_key: &KemSecretKey,
 ciphertext: &KemCiphertext) -> Result<SharedSecret, CryptoError> {
 let sk = SecretKey::from_bytes(&secret_key.0).map_err(|_| CryptoError::DecapsulationFailure)?;
 let shared_secret = mlkem1024::decapsulate(&ciphertext.0, &sk);
 let mut out = [0u8; KEM_SHARED_SECRET_SIZE];
 out.copy_from_slice(shared_secret.as_bytes());
 Ok(SharedSecret(out))
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn encapsulate_decapsulate_roundtrip() {
 let (pk, sk) = kem_keygen();
 let (ct, secret_a) = kem_encapsulate(&pk);
 let secret_b = kem_decapsulate(&sk, &ct).unwrap();
 assert_eq!(secret_a.as_bytes(), secret_b.as_bytes());
 }

 #[test]
 fn public_key_roundtrip_through_bytes() {
 let (pk, _sk) = kem_keygen();
 let encoded = pk.as_bytes().to_vec();
 let decoded = KemPublicKey::from_bytes(&encoded).unwrap();
 assert_eq!(pk.as_bytes(), decoded.as_bytes());
 }

 #[test]
 fn ciphertext_wrong_length_is_rejected() {
 let err = KemCiphertext::from_bytes(&[0u8; 4]).unwrap_err();
 assert!(matches!(err, CryptoError::KeySizeMismatch {.. }));
 }
}
