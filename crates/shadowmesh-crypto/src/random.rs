//! Secure random number generation.
//!
//! All randomness comes from the operating system CSPRNG via `getrandom`.
//! RNG failure is fatal to the calling process.

use crate::CryptoError;

/// Fill `buf` with random bytes from the OS CSPRNG.
///
/// # Errors
/// Returns [`CryptoError::RngFailure`] if the OS entropy source is
/// unavailable.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
 getrandom::getrandom(buf).map_err(|_| CryptoError::RngFailure)
}

/// Generate a random 32-byte array (session ids, nonce salts-before-split).
pub fn random_32() -> Result<[u8; 32], CryptoError> {
 let mut buf = [0u8; 32];
 fill_random(&mut buf)?;
 Ok(buf)
}

/// Generate a random 12-byte array (keystore AEAD nonces).
pub fn random_12() -> Result<[u8; 12], CryptoError> {
 let mut buf = [0u8; 12];
 fill_random(&mut buf)?;
 Ok(buf)
}

/// Generate a random 6-byte array (nonce-generator salts).
pub fn random_6() -> Result<[u8; 6], CryptoError> {
 let mut buf = [0u8; 6];
 fill_random(&mut buf)?;
 Ok(buf)
}

/// Generate a random 24-byte array (keystore XChaCha20-Poly1305 nonces).
pub fn random_24() -> Result<[u8; 24], CryptoError> {
 let mut buf = [0u8; 24];
 fill_random(&mut buf)?;
 Ok(buf)
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn random_32_is_not_all_zero() {
 assert_ne!(random_32().unwrap(), [0u8; 32]);
 }

 #[test]
 fn successive_calls_differ() {
 assert_ne!(random_32().unwrap(), random_32().unwrap());
 }
}
