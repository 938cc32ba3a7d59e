//! Cryptographic error types.

use thiserror::Error;

/// Errors surfaced by the crypto primitives, keystore, and nonce generator.
///
/// Per the data-plane design, every variant here is fatal at the scope in
/// which it occurs (a single AEAD call, a single handshake step, or a
/// single keystore load) and is never retried silently.
#[derive(Debug, Error)]
pub enum CryptoError {
 /// The OS CSPRNG failed to produce randomness.
 #[error("random number generation failed")]
 RngFailure,

 /// A key, nonce, or tag had the wrong length for its algorithm.
 #[error("key size mismatch: expected {expected}, got {actual}")]
 KeySizeMismatch {
 /// Expected length in bytes.
 expected: usize,
 /// Actual length in bytes.
 actual: usize,
 },

 /// ML-KEM decapsulation failed (malformed ciphertext or wrong key).
 #[error("KEM decapsulation failed")]
 DecapsulationFailure,

 /// AEAD authentication or signature verification failed.
 #[error("authentication failure")]
 AuthFailure,

 /// The nonce counter has been exhausted; the session must rotate keys.
 #[error("nonce counter exhausted, rekey required")]
 NonceExhaustion,
}
