//! Transport-layer error type.

use std::io;

/// Errors surfaced by the NIC adapter, the reliable/datagram transports, and
/// the frame router.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
 /// Underlying I/O failure (socket, TLS, kernel device).
 #[error("I/O error: {0}")]
 Io(#[from] io::Error),

 /// The transport or NIC has been closed and will not accept further
 /// operations.
 #[error("transport is closed")]
 Closed,

 /// A bounded queue rejected a write because it is at capacity.
 ///
 /// Not fatal: the caller drops the frame and bumps a counter rather
 /// than blocking.
 #[error("queue is full")]
 FullQueue,

 /// Binding a local socket failed.
 #[error("failed to bind: {0}")]
 BindFailed(String),

 /// Establishing the outbound connection failed.
 #[error("connection failed: {0}")]
 ConnectionFailed(String),

 /// A configuration value was rejected (e.g. an MTU of zero).
 #[error("invalid configuration: {0}")]
 InvalidConfig(String),

 /// An awaited operation lost the race against its timeout future.
 #[error("operation timed out")]
 Timeout,

 /// Two consecutive heartbeats went unanswered.
 #[error("heartbeat failure: peer unresponsive")]
 HeartbeatFailure,

 /// A frame arrived larger than the negotiated MTU or frame-size cap.
 #[error("frame of {0} bytes exceeds the {1}-byte limit")]
 FrameTooLarge(usize, usize),

 /// The WebSocket layer reported a protocol-level error.
 #[error("websocket error: {0}")]
 WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

 /// TLS setup or handshake failed.
 #[error("tls error: {0}")]
 Tls(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
