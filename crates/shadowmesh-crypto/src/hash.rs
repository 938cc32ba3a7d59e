//! SHA-256 hashing and HKDF-SHA256 key derivation.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use crate::CryptoError;

/// Compute the SHA-256 digest of `data`.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
 let mut hasher = Sha256::new();
 hasher.update(data);
 let digest = hasher.finalize();
 let mut out = [0u8; 32];
 out.copy_from_slice(&digest);
 out
}

/// HKDF-Extract-then-Expand over SHA-256.
///
/// `salt` and `info` are public context strings (session id, direction
/// labels); `ikm` is the secret input keying material (the KEM shared
/// secret during the handshake, or the previous chain key during
/// rotation). Returns `out_len` bytes of derived key material.
///
/// # Errors
/// Returns [`CryptoError::KeySizeMismatch`] if `out_len` exceeds HKDF's
/// maximum output (255 * 32 bytes for SHA-256), which no caller in this
/// crate ever requests.
pub fn hkdf(ikm: &[u8], salt: &[u8], info: &[u8], out_len: usize) -> Result<Vec<u8>, CryptoError> {
 let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
 let mut out = vec![0u8; out_len];
 hk.expand(info, &mut out)
.map_err(|_| CryptoError::KeySizeMismatch {
 expected: 255 * 32,
 actual: out_len,
 })?;
 Ok(out)
}

/// Derive a fixed-size 32-byte key via HKDF-SHA256.
///
/// Convenience wrapper around [`hkdf`] for the common case of deriving a
/// single AEAD key.
pub fn hkdf32(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; 32], CryptoError> {
 let bytes = hkdf(ikm, salt, info, 32)?;
 let mut out = [0u8; 32];
 out.copy_from_slice(&bytes);
 Ok(out)
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn sha256_is_deterministic() {
 assert_eq!(sha256(b"shadowmesh"), sha256(b"shadowmesh"));
 assert_ne!(sha256(b"shadowmesh"), sha256(b"ShadowMesh"));
 }

 #[test]
 fn hkdf_derives_independent_directional_keys() {
 let ikm = [0x11u8; 32];
 let salt = [0x22u8; 32];
 let tx = hkdf32(&ikm, &salt, b"shadowmesh tx I->R").unwrap();
 let rx = hkdf32(&ikm, &salt, b"shadowmesh tx R->I").unwrap();
 assert_ne!(tx, rx);
 }

 #[test]
 fn hkdf_is_deterministic_given_same_inputs() {
 let ikm = [0x33u8; 32];
 let salt = [0x44u8; 32];
 let a = hkdf32(&ikm, &salt, b"label").unwrap();
 let b = hkdf32(&ikm, &salt, b"label").unwrap();
 assert_eq!(a, b);
 }
}
