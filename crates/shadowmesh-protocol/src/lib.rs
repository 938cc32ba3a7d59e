//! # ShadowMesh Protocol
//!
//! Frame codec, four-message post-quantum handshake, and encrypted session
//! state for the ShadowMesh overlay network.
//!
//! This crate provides:
//! - Length-prefixed wire framing for handshake/control messages and
//! fixed-header datagram frames
//! - The `HELLO`/`CHALLENGE`/`RESPONSE`/`ESTABLISHED` handshake state
//! machine, binding an ML-KEM-1024 exchange to ML-DSA-87 signatures over
//! the full byte-exact transcript
//! - Post-handshake `Session` state: AEAD seal/open, a 64-frame sliding
//! replay window, and lock-step key rotation
//! - IP-header-preserving seal/open for datagram DATA frames
//!
//! It is transport-agnostic: nothing here touches a socket. Timeouts,
//! connection state, and actual I/O belong to `shadowmesh-transport` and
//! `shadowmesh-supervisor`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod handshake;
pub mod rotation;
pub mod session;

pub use error::Error;
pub use session::Session;
