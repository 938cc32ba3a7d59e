//! # ShadowMesh Crypto
//!
//! Post-quantum cryptographic primitives for the ShadowMesh overlay
//! protocol.
//!
//! This crate provides:
//! - ML-KEM-1024 key encapsulation for the handshake
//! - ML-DSA-87 signatures for long-term peer identity and transcript binding
//! - HKDF-SHA256 key derivation for directional session keys
//! - ChaCha20-Poly1305 / XChaCha20-Poly1305 AEAD encryption
//! - A monotonic per-session nonce generator
//! - A passphrase-encrypted identity keystore
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|-----------------|
//! | Key Exchange | ML-KEM-1024 | NIST Level 5 |
//! | Signatures | ML-DSA-87 | NIST Level 5 |
//! | AEAD (data plane) | ChaCha20-Poly1305 | 256-bit key |
//! | AEAD (keystore) | XChaCha20-Poly1305 | 256-bit key |
//! | Hash | SHA-256 | 128-bit collision |
//! | KDF | HKDF-SHA256 | 256-bit |
//! | Keystore KDF | PBKDF2-HMAC-SHA256 | ≥100,000 iterations |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aead;
pub mod error;
pub mod hash;
pub mod kem;
pub mod keystore;
pub mod nonce;
pub mod random;
pub mod signatures;

pub use error::CryptoError;
pub use kem::KEM_SHARED_SECRET_SIZE;

/// ChaCha20-Poly1305 key size.
pub const AEAD_KEY_SIZE: usize = 32;

/// ChaCha20-Poly1305 nonce size (data plane).
pub const AEAD_NONCE_SIZE: usize = 12;

/// XChaCha20-Poly1305 nonce size (keystore).
pub const XAEAD_NONCE_SIZE: usize = 24;

/// SHA-256 / peer identity output size.
pub const IDENTITY_SIZE: usize = 32;
