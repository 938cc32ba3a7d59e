//! Reliable transport: WebSocket over TLS 1.3.
//!
//! A single bidirectional, message-oriented channel carrying the
//! length-prefixed handshake/control frames defined in `shadowmesh-protocol`.
//! Delivery is in-order and lossless by construction of the underlying
//! TCP/TLS/WebSocket stack; nothing here re-implements retransmission.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use socket2::SockRef;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::server::TlsStream as ServerTlsStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{TransportError, TransportResult};

/// Read/write buffer size for the WebSocket stream. Smaller buffers cause
/// cascading retransmission under sustained throughput, so this is treated
/// as a correctness-adjacent constant rather than a tunable default.
pub const BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Consecutive unanswered heartbeats before the transport reports failure.
const MAX_MISSED_HEARTBEATS: u32 = 2;

/// WebSocket stream type for the client (initiator) side of a connection.
pub type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// WebSocket stream type for the server (relay/listener) side of a
/// connection.
pub type ServerStream = WebSocketStream<ServerTlsStream<TcpStream>>;

fn websocket_config() -> WebSocketConfig {
 WebSocketConfig {
 max_write_buffer_size: BUFFER_SIZE,
 write_buffer_size: BUFFER_SIZE / 4,
 max_message_size: Some(BUFFER_SIZE),
 max_frame_size: Some(BUFFER_SIZE),
..Default::default()
 }
}

/// Set the TCP socket's kernel buffers to [`BUFFER_SIZE`], logging (not
/// failing) if the OS refuses the requested size.
pub fn tune_socket_buffers(stream: &TcpStream) -> TransportResult<()> {
 let sock = SockRef::from(stream);
 if let Err(e) = sock.set_recv_buffer_size(BUFFER_SIZE) {
 tracing::warn!(error = %e, "kernel refused requested receive buffer size");
 }
 if let Err(e) = sock.set_send_buffer_size(BUFFER_SIZE) {
 tracing::warn!(error = %e, "kernel refused requested send buffer size");
 }
 sock.set_tcp_nodelay(true)?;
 Ok(())
}

/// Establish the client side of a reliable transport: TCP connect, TLS 1.3
/// handshake, then WebSocket upgrade.
///
/// # Errors
/// Returns [`TransportError::ConnectionFailed`] if any stage fails.
pub async fn connect(
 url: &str,
 tls_config: Arc<rustls::ClientConfig>) -> TransportResult<ReliableTransport<MaybeTlsStream<TcpStream>>> {
 let connector = tokio_tungstenite::Connector::Rustls(tls_config);
 let (stream, _response) = tokio_tungstenite::connect_async_tls_with_config(
 url,
 Some(websocket_config()),
 true,
 Some(connector))
.await
.map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

 Ok(ReliableTransport::new(stream))
}

/// Complete the server side of a reliable transport over an already-accepted
/// TCP connection: TLS 1.3 handshake, then WebSocket upgrade.
///
/// # Errors
/// Returns [`TransportError::Tls`] if the TLS handshake fails, or
/// [`TransportError::WebSocket`] if the upgrade fails.
pub async fn accept(
 tcp: TcpStream,
 tls_acceptor: tokio_rustls::TlsAcceptor) -> TransportResult<ReliableTransport<ServerTlsStream<TcpStream>>> {
 tune_socket_buffers(&tcp)?;
 let tls_stream = tls_acceptor
.accept(tcp)
.await
.map_err(|e| TransportError::Tls(e.to_string()))?;
 let stream =
 tokio_tungstenite::accept_async_with_config(tls_stream, Some(websocket_config())).await?;
 Ok(ReliableTransport::new(stream))
}

/// A single bidirectional WebSocket-over-TLS channel plus heartbeat
/// bookkeeping.
pub struct ReliableTransport<S> {
 stream: Mutex<WebSocketStream<S>>,
 missed_heartbeats: AtomicU32,
 failed: AtomicBool,
}

impl<S> ReliableTransport<S>
where
 S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
 fn new(stream: WebSocketStream<S>) -> Self {
 Self {
 stream: Mutex::new(stream),
 missed_heartbeats: AtomicU32::new(0),
 failed: AtomicBool::new(false),
 }
 }

 /// Send one length-prefixed frame body as a binary WebSocket message.
 ///
 /// # Errors
 /// Returns [`TransportError::Closed`] if marked failed, or
 /// [`TransportError::WebSocket`] on a protocol error.
 pub async fn send(&self, body: Vec<u8>) -> TransportResult<()> {
 if self.failed.load(Ordering::Acquire) {
 return Err(TransportError::Closed);
 }
 let mut ws = self.stream.lock().await;
 ws.send(Message::Binary(body)).await?;
 Ok(())
 }

 /// Receive the next frame body, transparently answering `Ping`s and
 /// recording `Pong`s as heartbeat responses.
 ///
 /// # Errors
 /// Returns [`TransportError::Closed`] when the peer closes the stream.
 pub async fn recv(&self) -> TransportResult<Vec<u8>> {
 let mut ws = self.stream.lock().await;
 loop {
 let msg = ws.next().await.ok_or(TransportError::Closed)??;
 match msg {
 Message::Binary(body) => return Ok(body),
 Message::Ping(payload) => {
 ws.send(Message::Pong(payload)).await?;
 }
 Message::Pong(_) => {
 self.missed_heartbeats.store(0, Ordering::Release);
 }
 Message::Close(_) => return Err(TransportError::Closed),
 Message::Text(_) | Message::Frame(_) => {
 tracing::debug!("dropping unexpected non-binary websocket message");
 }
 }
 }
 }

 /// Send a heartbeat `PING`. Call on `heartbeat_interval` from the
 /// supervisor's ticker.
 ///
 /// # Errors
 /// Returns [`TransportError::HeartbeatFailure`] once
 /// `MAX_MISSED_HEARTBEATS` consecutive pings have gone unanswered.
 pub async fn send_heartbeat(&self) -> TransportResult<()> {
 let missed = self.missed_heartbeats.fetch_add(1, Ordering::AcqRel) + 1;
 if missed > MAX_MISSED_HEARTBEATS {
 self.failed.store(true, Ordering::Release);
 return Err(TransportError::HeartbeatFailure);
 }
 let mut ws = self.stream.lock().await;
 ws.send(Message::Ping(Vec::new())).await?;
 Ok(())
 }

 /// Whether the transport has reported heartbeat failure to its caller.
 pub fn is_failed(&self) -> bool {
 self.failed.load(Ordering::Acquire)
 }

 /// Send a graceful close frame.
 ///
 /// # Errors
 /// Returns [`TransportError::WebSocket`] if the close frame cannot be
 /// sent.
 pub async fn close(&self) -> TransportResult<()> {
 self.failed.store(true, Ordering::Release);
 let mut ws = self.stream.lock().await;
 ws.close(None).await?;
 Ok(())
 }
}

/// Default heartbeat interval, overridable per session via the ESTABLISHED
/// handshake field.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
 use super::*;

 #[tokio::test]
 async fn heartbeat_failure_after_two_unanswered_pings() {
 // Drive the counter directly: no live socket is needed to exercise
 // the failure-reporting threshold.
 let missed = AtomicU32::new(0);
 let failed = AtomicBool::new(false);
 for _ in 0..MAX_MISSED_HEARTBEATS {
 let n = missed.fetch_add(1, Ordering::AcqRel) + 1;
 assert!(n <= MAX_MISSED_HEARTBEATS);
 }
 let n = missed.fetch_add(1, Ordering::AcqRel) + 1;
 if n > MAX_MISSED_HEARTBEATS {
 failed.store(true, Ordering::Release);
 }
 assert!(failed.load(Ordering::Acquire));
 }
}
