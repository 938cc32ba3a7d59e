//! Long-term identity keystore.
//!
//! Persists a single ML-DSA-87 keypair, encrypted under a passphrase with
//! PBKDF2-HMAC-SHA256 (≥100,000 iterations) and XChaCha20-Poly1305 (nonces
//! drawn fresh from the OS CSPRNG rather than derived from a counter). The
//! on-disk layout is fixed by:
//!
//! ```text
//! magic(4) ‖ version u8 ‖ salt(32) ‖ iters u32 ‖ nonce(24) ‖
//! ct_len u32 ‖ ct ‖ ml_dsa_pub_len u16 ‖ ml_dsa_pub
//! ```

use thiserror::Error;
use zeroize::Zeroizing;

use crate::aead::{xaead_open, xaead_seal, AeadKey};
use crate::signatures::{self, SigPublicKey, SigSecretKey};

const MAGIC: &[u8; 4] = b"SMK1";
const FORMAT_VERSION: u8 = 1;
const SALT_SIZE: usize = 32;
const MIN_ITERATIONS: u32 = 100_000;
const MIN_PASSPHRASE_LEN: usize = 12;

/// A small embedded list of passphrases rejected outright as too common.
const COMMON_PASSPHRASES: &[&str] = &[
 "password123", "123456789012", "qwertyuiop12", "letmein123456",
 "changeme1234", "administrator", "passwordpassword",
];

/// Errors raised while creating or loading a keystore.
#[derive(Debug, Error)]
pub enum KeystoreError {
 /// The passphrase failed validation (length, charset, common list).
 #[error("invalid passphrase: {0}")]
 InvalidPassphrase(&'static str),

 /// The passphrase was wrong, or the file was corrupt. Deliberately not
 /// distinguished at the API boundary.
 #[error("failed to decrypt keystore: wrong passphrase or corrupt file")]
 DecryptFailed,

 /// The file did not match the expected on-disk layout.
 #[error("malformed keystore file: {0}")]
 Malformed(&'static str),

 /// A cryptographic primitive failed.
 #[error(transparent)]
 Crypto(#[from] crate::CryptoError),

 /// Underlying filesystem I/O failed.
 #[error("keystore I/O error: {0}")]
 Io(#[from] std::io::Error),
}

/// The long-term peer identity loaded from a keystore.
pub struct Identity {
 /// ML-DSA-87 public key.
 pub public: SigPublicKey,
 /// ML-DSA-87 secret key.
 pub secret: SigSecretKey,
}

impl Identity {
 /// The 32-byte peer identity, `SHA256(public_key)`.
 #[must_use]
 pub fn id(&self) -> [u8; 32] {
 self.public.identity()
 }
}

/// Validate a passphrase at least 12 characters, UTF-8,
/// trimmed, and not present in a small common-passwords list.
///
/// # Errors
/// Returns [`KeystoreError::InvalidPassphrase`] describing the failure.
pub fn validate_passphrase(passphrase: &str) -> Result<(), KeystoreError> {
 let trimmed = passphrase.trim();
 if trimmed.chars().count() < MIN_PASSPHRASE_LEN {
 return Err(KeystoreError::InvalidPassphrase(
 "passphrase must be at least 12 characters"));
 }
 if COMMON_PASSPHRASES
.iter()
.any(|common| common.eq_ignore_ascii_case(trimmed))
 {
 return Err(KeystoreError::InvalidPassphrase(
 "passphrase is too common"));
 }
 Ok(())
}

fn derive_key(passphrase: &str, salt: &[u8; SALT_SIZE], iters: u32) -> AeadKey {
 let mut key = [0u8; 32];
 pbkdf2::pbkdf2_hmac::<sha2::Sha256>(passphrase.trim().as_bytes(), salt, iters, &mut key);
 AeadKey::new(key)
}

/// Create a new identity and serialize it into the on-disk keystore format.
///
/// Returns the serialized bytes; the caller is responsible for writing them
/// to a file with mode `0600` (filesystem policy is a host-integration
/// concern, outside this crate).
///
/// # Errors
/// Returns [`KeystoreError::InvalidPassphrase`] if `passphrase` fails
/// validation, or a crypto error if key generation / sealing fails.
pub fn create(passphrase: &str) -> Result<(Identity, Vec<u8>), KeystoreError> {
 validate_passphrase(passphrase)?;

 let (public, secret) = signatures::generate_identity();
 let salt = crate::random::random_32()?;
 let salt: [u8; SALT_SIZE] = salt;
 let nonce = crate::random::random_24()?;
 let key = derive_key(passphrase, &salt, MIN_ITERATIONS);

 let ciphertext = xaead_seal(&key, &nonce, public.as_bytes(), secret.as_bytes())?;

 let mut out = Vec::with_capacity(
 4 + 1 + SALT_SIZE + 4 + 24 + 4 + ciphertext.len() + 2 + public.as_bytes().len());
 out.extend_from_slice(MAGIC);
 out.push(FORMAT_VERSION);
 out.extend_from_slice(&salt);
 out.extend_from_slice(&MIN_ITERATIONS.to_be_bytes());
 out.extend_from_slice(&nonce);
 out.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
 out.extend_from_slice(&ciphertext);
 out.extend_from_slice(&(public.as_bytes().len() as u16).to_be_bytes());
 out.extend_from_slice(public.as_bytes());

 Ok((Identity { public, secret }, out))
}

/// Load an identity from serialized keystore bytes.
///
/// # Errors
/// Returns [`KeystoreError::Malformed`] if the layout is invalid,
/// [`KeystoreError::DecryptFailed`] if the passphrase is wrong or the
/// ciphertext is corrupt (these are never distinguished), or a crypto
/// error for other primitive failures.
pub fn load(data: &[u8], passphrase: &str) -> Result<Identity, KeystoreError> {
 let mut cursor = Cursor::new(data);

 let magic = cursor.take(4)?;
 if magic != MAGIC {
 return Err(KeystoreError::Malformed("bad magic"));
 }
 let version = cursor.take(1)?[0];
 if version != FORMAT_VERSION {
 return Err(KeystoreError::Malformed("unsupported version"));
 }
 let salt: [u8; SALT_SIZE] = cursor.take(SALT_SIZE)?.try_into().unwrap();
 let iters = u32::from_be_bytes(cursor.take(4)?.try_into().unwrap());
 let nonce: [u8; 24] = cursor.take(24)?.try_into().unwrap();
 let ct_len = u32::from_be_bytes(cursor.take(4)?.try_into().unwrap()) as usize;
 let ciphertext = cursor.take(ct_len)?.to_vec();
 let pub_len = u16::from_be_bytes(cursor.take(2)?.try_into().unwrap()) as usize;
 let public_bytes = cursor.take(pub_len)?.to_vec();
 cursor.finish()?;

 if iters < MIN_ITERATIONS {
 return Err(KeystoreError::Malformed("iteration count below minimum"));
 }

 let public = SigPublicKey::from_bytes(&public_bytes)
.map_err(|_| KeystoreError::Malformed("invalid public key encoding"))?;

 let key = derive_key(passphrase, &salt, iters);
 let secret_bytes = Zeroizing::new(
 xaead_open(&key, &nonce, &public_bytes, &ciphertext).map_err(|_| KeystoreError::DecryptFailed)?);
 let secret = signatures::secret_key_from_bytes(&secret_bytes)
.map_err(|_| KeystoreError::DecryptFailed)?;

 Ok(Identity { public, secret })
}

/// Minimal cursor over a byte slice used by [`load`]; kept local since this
/// is the only parser in the crate that needs sequential fixed/length-
/// prefixed reads outside the wire codec (which lives in
/// `shadowmesh-protocol`).
struct Cursor<'a> {
 data: &'a [u8],
 pos: usize,
}

impl<'a> Cursor<'a> {
 fn new(data: &'a [u8]) -> Self {
 Self { data, pos: 0 }
 }

 fn take(&mut self, n: usize) -> Result<&'a [u8], KeystoreError> {
 if self.pos + n > self.data.len() {
 return Err(KeystoreError::Malformed("truncated keystore file"));
 }
 let slice = &self.data[self.pos..self.pos + n];
 self.pos += n;
 Ok(slice)
 }

 fn finish(&self) -> Result<(), KeystoreError> {
 if self.pos != self.data.len() {
 return Err(KeystoreError::Malformed("trailing bytes after keystore record"));
 }
 Ok(())
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 const PASSPHRASE: &str = "correct horse battery staple";

 #[test]
 fn create_then_load_roundtrip() {
 let (identity, bytes) = create(PASSPHRASE).unwrap();
 let loaded = load(&bytes, PASSPHRASE).unwrap();
 assert_eq!(identity.id(), loaded.id());
 }

 #[test]
 fn wrong_passphrase_is_rejected() {
 let (_identity, bytes) = create(PASSPHRASE).unwrap();
 let err = load(&bytes, "totally the wrong passphrase").unwrap_err();
 assert!(matches!(err, KeystoreError::DecryptFailed));
 }

 #[test]
 fn corrupt_ciphertext_is_rejected_same_as_bad_passphrase() {
 let (_identity, mut bytes) = create(PASSPHRASE).unwrap();
 let last = bytes.len() - 10;
 bytes[last] ^= 0xFF;
 let err = load(&bytes, PASSPHRASE).unwrap_err();
 assert!(matches!(err, KeystoreError::DecryptFailed));
 }

 #[test]
 fn short_passphrase_rejected() {
 assert!(matches!(
 validate_passphrase("short"),
 Err(KeystoreError::InvalidPassphrase(_))
 ));
 }

 #[test]
 fn common_passphrase_rejected() {
 assert!(matches!(
 validate_passphrase("administrator"),
 Err(KeystoreError::InvalidPassphrase(_))
 ));
 }

 #[test]
 fn serialized_layout_starts_with_magic_and_version() {
 let (_identity, bytes) = create(PASSPHRASE).unwrap();
 assert_eq!(&bytes[0..4], MAGIC);
 assert_eq!(bytes[4], FORMAT_VERSION);
 }
}
