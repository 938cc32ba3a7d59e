//! Supervisor error type.

/// Why a connection attempt or an established session failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SupervisorError {
 /// Establishing the underlying transport timed out or was refused.
 #[error("connecting to peer failed: {0}")]
 ConnectFailed(String),

 /// The handshake aborted with a retryable reason (timeout or a protocol
 /// error that isn't an authentication mismatch).
 #[error("handshake failed (retryable): {0}")]
 HandshakeRetryable(String),

 /// The handshake aborted because identities or signatures did not
 /// match. Never retried automatically.
 #[error("handshake authentication mismatch")]
 AuthMismatch,

 /// Key rotation failed; the session is torn down rather than left in an
 /// inconsistent keyed state.
 #[error("key rotation failed: {0}")]
 RotationFailed(String),

 /// The active transport failed and no alternate path is known.
 #[error("transport failure: {0}")]
 TransportFailure(String),

 /// An awaited step (connect, handshake, heartbeat) exceeded its budget.
 #[error("operation timed out")]
 Timeout,
}
