//! ML-DSA-87 digital signatures for long-term peer identity and transcript
//! binding.

use pqcrypto_mldsa::mldsa87::{self, DetachedSignature, PublicKey, SecretKey};
use pqcrypto_traits::sign::{
 DetachedSignature as _, PublicKey as _, SecretKey as _,
};
use zeroize::Zeroizing;

use crate::CryptoError;

/// ML-DSA-87 public key, used as the long-term peer identity.
#[derive(Clone, Debug)]
pub struct SigPublicKey(PublicKey);

impl PartialEq for SigPublicKey {
 fn eq(&self, other: &Self) -> bool {
 self.as_bytes() == other.as_bytes()
 }
}

impl Eq for SigPublicKey {}

/// ML-DSA-87 secret signing key.
///
/// Raw bytes are kept in a [`Zeroizing`] buffer so the key material is wiped
/// on drop; the concrete `pqcrypto` key is reconstructed per signature.
#[derive(Clone)]
pub struct SigSecretKey(Zeroizing<Vec<u8>>);

impl std::fmt::Debug for SigSecretKey {
 fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
 f.debug_tuple("SigSecretKey").field(&"<redacted>").finish()
 }
}

/// ML-DSA-87 detached signature.
#[derive(Clone)]
pub struct Signature(DetachedSignature);

impl PartialEq for Signature {
 fn eq(&self, other: &Self) -> bool {
 self.as_bytes() == other.as_bytes()
 }
}

impl Eq for Signature {}

impl SigPublicKey {
 /// Encode as bytes for wire transmission.
 #[must_use]
 pub fn as_bytes(&self) -> &[u8] {
 self.0.as_bytes()
 }

 /// Decode from wire bytes.
 ///
 /// # Errors
 /// Returns [`CryptoError::KeySizeMismatch`] if the encoding is invalid.
 pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
 PublicKey::from_bytes(bytes)
.map(Self)
.map_err(|_| CryptoError::KeySizeMismatch {
 expected: mldsa87::public_key_bytes(),
 actual: bytes.len(),
 })
 }

 /// The peer identity: `SHA256(public_key)`, per the data model.
 #[must_use]
 pub fn identity(&self) -> [u8; 32] {
 crate::hash::sha256(self.as_bytes())
 }
}

impl Signature {
 /// Encode as bytes for wire transmission.
 #[must_use]
 pub fn as_bytes(&self) -> &[u8] {
 self.0.as_bytes()
 }

 /// Decode from wire bytes.
 ///
 /// # Errors
 /// Returns [`CryptoError::KeySizeMismatch`] if the encoding is invalid.
 pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
 DetachedSignature::from_bytes(bytes)
.map(Self)
.map_err(|_| CryptoError::KeySizeMismatch {
 expected: mldsa87::signature_bytes(),
 actual: bytes.len(),
 })
 }
}

/// Generate a long-term ML-DSA-87 identity keypair.
///
/// Called once at keystore creation time; the secret key is persisted only
/// in encrypted form (see [`crate::keystore`]).
#[must_use]
pub fn generate_identity() -> (SigPublicKey, SigSecretKey) {
 let (pk, sk) = mldsa87::keypair();
 let sk_bytes = Zeroizing::new(sk.as_bytes().to_vec());
 (SigPublicKey(pk), SigSecretKey(sk_bytes))
}

/// Reconstruct a secret key from its raw bytes (e.g. after keystore
/// decryption).
///
/// # Errors
/// Returns [`CryptoError::KeySizeMismatch`] if the encoding is invalid.
pub fn secret_key_from_bytes(bytes: &[u8]) -> Result<SigSecretKey, CryptoError> {
 let sk = SecretKey::from_bytes(bytes).map_err(|_| CryptoError::KeySizeMismatch {
 expected: mldsa87::secret_key_bytes(),
 actual: bytes.len(),
 })?;
 Ok(SigSecretKey(Zeroizing::new(sk.as_bytes().to_vec())))
}

impl SigSecretKey {
 /// Encode as bytes, e.g. for re-encryption into the keystore.
 #[must_use]
 pub fn as_bytes(&self) -> &[u8] {
 &self.0
 }
}

/// Sign `message` with the long-term identity key.
///
/// Used to bind HELLO/CHALLENGE/RESPONSE to the handshake transcript.
///
/// # Errors
/// Returns [`CryptoError::KeySizeMismatch`] if `secret` does not decode to a
/// valid ML-DSA-87 secret key (should not happen for keys produced by
/// [`generate_identity()`] or [`secret_key_from_bytes`]).
pub fn sign(secret: &SigSecretKey, message: &[u8]) -> Result<Signature, CryptoError> {
 let sk = SecretKey::from_bytes(&secret.0).map_err(|_| CryptoError::KeySizeMismatch {
 expected: mldsa87::secret_key_bytes(),
 actual: secret.0.len(),
 })?;
 Ok(Signature(mldsa87::detached_sign(message, &sk)))
}

/// Verify `signature` over `message` against `public`.
///
/// Returns `true` only if the signature is valid; never panics on malformed
/// input.
#[must_use]
pub fn verify(public: &SigPublicKey, message: &[u8], signature: &Signature) -> bool {
 mldsa87::verify_detached_signature(&signature.0, message, &public.0).is_ok()
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn sign_and_verify_roundtrip() {
 let (pk, sk) = generate_identity();
 let msg = b"shadowmesh handshake transcript";
 let sig = sign(&sk, msg).unwrap();
 assert!(verify(&pk, msg, &sig));
 }

 #[test]
 fn tampered_message_fails_verification() {
 let (pk, sk) = generate_identity();
 let sig = sign(&sk, b"original message").unwrap();
 assert!(!verify(&pk, b"tampered message", &sig));
 }

 #[test]
 fn tampered_signature_fails_verification() {
 let (pk, sk) = generate_identity();
 let msg = b"handshake transcript";
 let sig = sign(&sk, msg).unwrap();
 let mut bytes = sig.as_bytes().to_vec();
 bytes[0] ^= 0xFF;
 let tampered = Signature::from_bytes(&bytes).unwrap();
 assert!(!verify(&pk, msg, &tampered));
 }

 #[test]
 fn identity_is_sha256_of_public_key() {
 let (pk, _sk) = generate_identity();
 assert_eq!(pk.identity(), crate::hash::sha256(pk.as_bytes()));
 }
}
