//! Relay error type.

use shadowmesh_protocol::error::FrameError;

/// Why a relay connection or registration was rejected, or why a paired
/// session was torn down.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
 /// The REGISTER frame was not well-formed.
 #[error("malformed register frame: {0}")]
 MalformedRegister(#[from] FrameError),

 /// The REGISTER signature did not verify against the claimed identity.
 #[error("register signature did not verify")]
 BadSignature,

 /// The first frame on a new connection was not a REGISTER.
 #[error("expected REGISTER as the first frame")]
 ExpectedRegister,

 /// A frame exceeded the configured size cap and the session was closed.
 #[error("frame of {0} bytes exceeds the {1}-byte relay limit")]
 FrameTooLarge(usize, usize),

 /// No second peer presented the same session id within the pairing
 /// window.
 #[error("no peer arrived to pair with this session within the timeout")]
 PairingTimeout,

 /// A peer registered with a session id that already has two paired
 /// endpoints, or presented the same role as the peer already waiting.
 #[error("session slot is unavailable: already paired or role collision")]
 AlreadyPaired,

 /// The underlying reliable transport failed or was closed.
 #[error("transport error: {0}")]
 Transport(String),

 /// The connection closed normally (peer disconnected, pairing partner
 /// notified).
 #[error("peer closed the connection")]
 Closed,
}
