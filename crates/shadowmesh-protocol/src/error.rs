//! Error types for the ShadowMesh protocol layer.

use thiserror::Error;

/// Top-level protocol error, composed from the per-module errors below.
#[derive(Debug, Error)]
pub enum Error {
 /// Frame encode/decode error.
 #[error("frame error: {0}")]
 Frame(#[from] FrameError),

 /// Handshake state machine error.
 #[error("handshake error: {0}")]
 Handshake(#[from] HandshakeError),

 /// Session seal/open/rotate error.
 #[error("session error: {0}")]
 Session(#[from] SessionError),

 /// Cryptographic primitive error.
 #[error("crypto error: {0}")]
 Crypto(#[from] shadowmesh_crypto::CryptoError),
}

/// Frame-level errors.
#[derive(Debug, Error)]
pub enum FrameError {
 /// Buffer too short to contain a complete header.
 #[error("frame too short: expected at least {expected}, got {actual}")]
 TooShort {
 /// Minimum required length.
 expected: usize,
 /// Actual buffer length.
 actual: usize,
 },

 /// Declared length field does not match the bytes actually present.
 #[error("declared length {declared} does not match carrier length {actual}")]
 LengthMismatch {
 /// Length claimed by the frame header.
 declared: usize,
 /// Length of the buffer actually available.
 actual: usize,
 },

 /// Unrecognized type byte.
 #[error("unknown frame type: 0x{0:02X}")]
 UnknownType(u8),

 /// Message exceeds the 64 KiB bound.
 #[error("message of {0} bytes exceeds the 64 KiB frame bound")]
 TooLarge(usize),
}

/// Handshake state-machine errors.
#[derive(Debug, Error)]
pub enum HandshakeError {
 /// A message did not parse, or arrived in an unexpected state.
 #[error("malformed handshake message")]
 MalformedFrame(#[from] FrameError),

 /// Signature verification over the transcript failed.
 #[error("handshake signature verification failed")]
 AuthMismatch,

 /// ML-KEM decapsulation failed.
 #[error("KEM operation failed: {0}")]
 KemFailure(shadowmesh_crypto::CryptoError),

 /// No message arrived within the per-step timeout.
 #[error("handshake step timed out")]
 HandshakeTimeout,

 /// Peer declared an incompatible protocol version.
 #[error("peer protocol version is incompatible")]
 ProtocolIncompatible,

 /// A message arrived that is not valid in the current state.
 #[error("unexpected message in state {state}")]
 UnexpectedMessage {
 /// Human-readable name of the state the handshake was in.
 state: &'static str,
 },
}

/// Session-level errors.
#[derive(Debug, Error)]
pub enum SessionError {
 /// AEAD authentication failed on open.
 #[error("authentication failure")]
 AuthFailure,

 /// Frame was outside the replay window or a duplicate within it.
 #[error("replayed or stale frame")]
 Replay,

 /// The nonce counter is exhausted; caller must rotate before sealing again.
 #[error("nonce exhausted, rotation required")]
 NonceExhaustion,

 /// Underlying crypto primitive failed.
 #[error("crypto error: {0}")]
 Crypto(#[from] shadowmesh_crypto::CryptoError),
}
