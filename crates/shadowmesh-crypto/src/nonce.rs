//! Per-session monotonic nonce generator.
//!
//! State is `counter: u48 ‖ salt: [u8; 6]`. `next_nonce` atomically
//! increments the counter and returns the 12-byte AEAD nonce
//! `counter_be(6) ‖ salt(6)`. The generator refuses once the counter would
//! overflow `2^48 - 1`; callers must force key rotation before that point.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::CryptoError;

/// The largest representable 48-bit counter value.
pub const COUNTER_MAX: u64 = (1u64 << 48) - 1;

/// Soft threshold at which the supervisor should proactively trigger key
/// rotation, well ahead of [`COUNTER_MAX`].
pub const NONCE_SOFT_LIMIT: u64 = 1u64 << 44;

/// Monotonic nonce generator for one direction of one session.
///
/// `next_nonce` is lock-free (a single atomic fetch-add): the session's
/// `tx_seq` and nonce counter must stay atomic under concurrent seal calls.
pub struct NonceGenerator {
 counter: AtomicU64,
 salt: [u8; 6],
}

impl NonceGenerator {
 /// Create a generator starting at counter 0 with a fresh random salt.
 ///
 /// # Errors
 /// Returns [`CryptoError::RngFailure`] if the OS entropy source fails.
 pub fn new() -> Result<Self, CryptoError> {
 let salt = crate::random::random_6()?;
 Ok(Self::with_salt(salt))
 }

 /// Create a generator starting at counter 0 with an explicit salt.
 ///
 /// Used by [`Self::reset`] and in tests where determinism is required.
 #[must_use]
 pub fn with_salt(salt: [u8; 6]) -> Self {
 Self {
 counter: AtomicU64::new(0),
 salt,
 }
 }

 /// Produce the next 12-byte nonce, incrementing the counter.
 ///
 /// # Errors
 /// Returns [`CryptoError::NonceExhaustion`] once the counter would
 /// exceed [`COUNTER_MAX`]; the caller must rotate session keys before
 /// calling again.
 pub fn next_nonce(&self) -> Result<[u8; 12], CryptoError> {
 let counter = self.counter.fetch_add(1, Ordering::Relaxed);
 if counter >= COUNTER_MAX {
 return Err(CryptoError::NonceExhaustion);
 }
 Ok(Self::encode(counter, &self.salt))
 }

 /// Current counter value, for soft-threshold polling by the supervisor.
 #[must_use]
 pub fn counter(&self) -> u64 {
 self.counter.load(Ordering::Relaxed)
 }

 /// Whether the soft threshold has been crossed
 /// and rotation should be scheduled proactively.
 #[must_use]
 pub fn past_soft_limit(&self) -> bool {
 self.counter() >= NONCE_SOFT_LIMIT
 }

 /// Reset the generator to counter 0 with a fresh salt.
 ///
 /// Only valid when the surrounding session is being torn down or a new
 /// session key is about to be installed, never while a live key is
 /// still in use. Enforced by callers: [`crate`] exposes
 /// no path from a live `Session` to this method except through its own
 /// `rotate`/teardown logic.
 ///
 /// # Errors
 /// Returns [`CryptoError::RngFailure`] if the OS entropy source fails.
 pub fn reset(&mut self) -> Result<(), CryptoError> {
 self.salt = crate::random::random_6()?;
 *self.counter.get_mut() = 0;
 Ok(())
 }

 fn encode(counter: u64, salt: &[u8; 6]) -> [u8; 12] {
 let mut out = [0u8; 12];
 out[..6].copy_from_slice(&counter.to_be_bytes()[2..]);
 out[6..].copy_from_slice(salt);
 out
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn successive_nonces_differ() {
 let gen = NonceGenerator::with_salt([1, 2, 3, 4, 5, 6]);
 let n1 = gen.next_nonce().unwrap();
 let n2 = gen.next_nonce().unwrap();
 assert_ne!(n1, n2);
 }

 #[test]
 fn nonce_encodes_counter_then_salt() {
 let gen = NonceGenerator::with_salt([0xAA; 6]);
 let n = gen.next_nonce().unwrap();
 assert_eq!(&n[6..], &[0xAA; 6]);
 assert_eq!(&n[..6], &[0, 0, 0, 0, 0, 0]);
 }

 #[test]
 fn refuses_past_counter_max() {
 let gen = NonceGenerator::with_salt([0; 6]);
 // At 2^48 - 2, one more seal is still valid...
 gen.counter.store(COUNTER_MAX - 1, Ordering::Relaxed);
 assert!(gen.next_nonce().is_ok());
 //...but the next attempt without rotation is refused, since the
 // counter has now reached 2^48 - 1.
 assert!(matches!(
 gen.next_nonce(),
 Err(CryptoError::NonceExhaustion)
 ));
 }

 #[test]
 fn past_soft_limit_flags_before_hard_exhaustion() {
 let gen = NonceGenerator::with_salt([0; 6]);
 gen.counter.store(NONCE_SOFT_LIMIT, Ordering::Relaxed);
 assert!(gen.past_soft_limit());
 }

 #[test]
 fn reset_requires_mutable_access() {
 let mut gen = NonceGenerator::with_salt([9; 6]);
 let _ = gen.next_nonce().unwrap();
 gen.reset().unwrap();
 assert_eq!(gen.counter(), 0);
 }
}
