//! The relay's view of one connected endpoint: send/receive opaque,
//! already-framed byte strings, nothing more.
//!
//! The relay never decodes session traffic; only the registration
//! frame is parsed (it carries the pairing key). Keeping this as a trait
//! rather than depending directly on [`shadowmesh_transport::reliable::ReliableTransport`]
//! lets tests drive the pairing/pump logic over in-memory channels.

use async_trait::async_trait;

use crate::error::RelayError;

/// One bidirectional byte-message channel to a registered client.
#[async_trait]
pub trait RelayLink: Send + Sync {
 /// Send one opaque frame.
 async fn send(&self, body: Vec<u8>) -> Result<(), RelayError>;

 /// Receive the next opaque frame, or an error once the peer disconnects.
 async fn recv(&self) -> Result<Vec<u8>, RelayError>;

 /// Close the underlying connection.
 async fn close(&self) -> Result<(), RelayError>;
}

#[async_trait]
impl<S> RelayLink for shadowmesh_transport::reliable::ReliableTransport<S>
where
 S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
 async fn send(&self, body: Vec<u8>) -> Result<(), RelayError> {
 self.send(body)
.await
.map_err(|e| RelayError::Transport(e.to_string()))
 }

 async fn recv(&self) -> Result<Vec<u8>, RelayError> {
 self.recv()
.await
.map_err(|e| RelayError::Transport(e.to_string()))
 }

 async fn close(&self) -> Result<(), RelayError> {
 self.close()
.await
.map_err(|e| RelayError::Transport(e.to_string()))
 }
}
