//! The relay forwarder.
//!
//! Accepts inbound reliable-transport connections, performs a thin
//! REGISTER handshake, pairs two clients presenting the same session id
//! with opposite roles, then pumps opaque frames between them. The relay
//! never inspects plaintext and never retries a dropped pairing; that is
//! the client supervisors' job.
//!
//! Structured as an accept loop plus per-client registration and a cleanup
//! sweep for stale state, restructured from UDP/address-routed delivery
//! into a paired, full-duplex byte pump over two independently-registered
//! reliable connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use shadowmesh_crypto::signatures::verify;
use shadowmesh_protocol::frame::{decode_handshake_frame, encode_handshake_frame, HandshakeType};
use tokio::sync::{oneshot, RwLock};

use crate::error::RelayError;
use crate::link::RelayLink;
use crate::rate_limiter::{RateLimiterConfig, TokenBucket};
use crate::register::{self, Role};

/// Default cap on any single forwarded frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default window for a session's second peer to arrive.
pub const DEFAULT_PAIRING_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval at which the background sweep evicts stale waiting registrations.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5);

/// Tunable relay policy.
#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
 /// Oversize frames close the session.
 pub max_frame_size: usize,
 /// How long a registered peer waits for its pair.
 pub pairing_timeout: Duration,
 /// Per-session rate limit.
 pub rate_limit: RateLimiterConfig,
}

impl Default for RelayConfig {
 fn default() -> Self {
 Self {
 max_frame_size: DEFAULT_MAX_FRAME_SIZE,
 pairing_timeout: DEFAULT_PAIRING_TIMEOUT,
 rate_limit: RateLimiterConfig::default(),
 }
 }
}

/// Point-in-time counters for a paired session, for observability.
#[derive(Debug, Clone, Copy)]
pub struct SessionMetrics {
 /// Bytes forwarded A-to-B.
 pub bytes_a_to_b: u64,
 /// Bytes forwarded B-to-A.
 pub bytes_b_to_a: u64,
 /// Frames dropped for exceeding the rate cap.
 pub rate_dropped: u64,
}

struct PairedState {
 bytes_a_to_b: AtomicU64,
 bytes_b_to_a: AtomicU64,
 rate_dropped: AtomicU64,
 bucket: TokenBucket,
 cancel: tokio_util::sync::CancellationToken,
 /// Counts down from 2; the pump that decrements it to zero removes the
 /// routing entry.
 live_directions: AtomicU8,
}

impl PairedState {
 fn new(config: RateLimiterConfig) -> Self {
 Self {
 bytes_a_to_b: AtomicU64::new(0),
 bytes_b_to_a: AtomicU64::new(0),
 rate_dropped: AtomicU64::new(0),
 bucket: TokenBucket::new(config),
 cancel: tokio_util::sync::CancellationToken::new(),
 live_directions: AtomicU8::new(2),
 }
 }

 fn metrics(&self) -> SessionMetrics {
 SessionMetrics {
 bytes_a_to_b: self.bytes_a_to_b.load(Ordering::Relaxed),
 bytes_b_to_a: self.bytes_b_to_a.load(Ordering::Relaxed),
 rate_dropped: self.rate_dropped.load(Ordering::Relaxed),
 }
 }
}

/// Handed from the second peer's registration to the first peer's waiting
/// task, to let it start forwarding.
struct Paired {
 peer_link: Arc<dyn RelayLink>,
 state: Arc<PairedState>,
}

struct Waiting {
 role: Role,
 link: Arc<dyn RelayLink>,
 since: Instant,
 notify: oneshot::Sender<Paired>,
}

enum Entry {
 Waiting(Waiting),
 Paired(Arc<PairedState>),
}

/// The relay's single routing table: `session_id -> (endpoint_a,
/// endpoint_b)`, guarded by one reader-writer lock.
struct RoutingTable {
 entries: RwLock<HashMap<[u8; 32], Entry>>,
}

impl RoutingTable {
 fn new() -> Self {
 Self {
 entries: RwLock::new(HashMap::new()),
 }
 }
}

/// Accepts registrations, pairs endpoints, and pumps opaque frames between
/// them.
pub struct RelayServer {
 config: RelayConfig,
 table: Arc<RoutingTable>,
}

impl RelayServer {
 /// Build a relay with `config` policy.
 #[must_use]
 pub fn new(config: RelayConfig) -> Self {
 Self {
 config,
 table: Arc::new(RoutingTable::new()),
 }
 }

 /// Metrics for a currently-paired session, if any.
 pub async fn session_metrics(&self, session_id: &[u8; 32]) -> Option<SessionMetrics> {
 let entries = self.table.entries.read().await;
 match entries.get(session_id)? {
 Entry::Paired(state) => Some(state.metrics()),
 Entry::Waiting(_) => None,
 }
 }

 /// Number of sessions currently waiting for a second peer.
 pub async fn waiting_count(&self) -> usize {
 self.table
.entries
.read()
.await
.values()
.filter(|e| matches!(e, Entry::Waiting(_)))
.count()
 }

 /// Number of currently-paired sessions.
 pub async fn paired_count(&self) -> usize {
 self.table
.entries
.read()
.await
.values()
.filter(|e| matches!(e, Entry::Paired(_)))
.count()
 }

 /// Spawn the background task that evicts registrations whose pairing
 /// window has elapsed.
 pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
 let server = Arc::clone(self);
 // Sweep at least as often as a quarter of the pairing timeout, so a
 // short timeout (as in tests) doesn't wait on the production default.
 let interval = CLEANUP_INTERVAL.min(self.config.pairing_timeout / 4).max(Duration::from_millis(1));
 tokio::spawn(async move {
 let mut tick = tokio::time::interval(interval);
 loop {
 tick.tick().await;
 server.evict_stale().await;
 }
 })
 }

 async fn evict_stale(&self) {
 let timeout = self.config.pairing_timeout;
 let mut entries = self.table.entries.write().await;
 let stale: Vec<[u8; 32]> = entries
.iter()
.filter_map(|(id, e)| match e {
 Entry::Waiting(w) if w.since.elapsed() >= timeout => Some(*id),
 _ => None,
 })
.collect();
 for id in stale {
 if let Some(Entry::Waiting(w)) = entries.remove(&id) {
 tracing::debug!(session_id = %hex::encode(id), "pairing timed out, evicting");
 let _ = w.link.close().await;
 // Dropping `w.notify` would be redundant here since `w` is
 // already fully owned and drops at end of scope.
 }
 }
 }

 /// Handle one freshly-accepted connection end to end: read its REGISTER
 /// frame, pair it (or wait to be paired), then pump frames until either
 /// side closes.
 ///
 /// # Errors
 /// Returns [`RelayError`] on a malformed registration, a bad signature,
 /// a pairing timeout, or a transport failure.
 pub async fn handle_link(&self, link: Arc<dyn RelayLink>) -> Result<(), RelayError> {
 let (role, session_id) = self.register(&link).await?;

 let paired = {
 let mut entries = self.table.entries.write().await;
 match entries.remove(&session_id) {
 None => {
 let (tx, rx) = oneshot::channel();
 entries.insert(
 session_id,
 Entry::Waiting(Waiting {
 role,
 link: Arc::clone(&link),
 since: Instant::now(),
 notify: tx,
 }));
 drop(entries);
 match rx.await {
 Ok(paired) => paired,
 Err(_) => {
 let _ = link.close().await;
 return Err(RelayError::PairingTimeout);
 }
 }
 }
 Some(Entry::Waiting(waiting)) if waiting.role == role.opposite() => {
 let state = Arc::new(PairedState::new(self.config.rate_limit));
 entries.insert(session_id, Entry::Paired(Arc::clone(&state)));
 drop(entries);
 let _ = waiting.notify.send(Paired {
 peer_link: Arc::clone(&link),
 state: Arc::clone(&state),
 });
 Paired {
 peer_link: waiting.link,
 state,
 }
 }
 Some(other) => {
 // Either the same role registered twice, or the session
 // is already fully paired. Restore the entry untouched
 // and reject the newcomer.
 entries.insert(session_id, other);
 drop(entries);
 let _ = link.close().await;
 return Err(RelayError::AlreadyPaired);
 }
 }
 };

 let result = self.pump(&link, &paired.peer_link, &paired.state, role).await;

 if paired.state.live_directions.fetch_sub(1, Ordering::AcqRel) == 1 {
 self.table.entries.write().await.remove(&session_id);
 }
 result
 }

 async fn register(&self, link: &Arc<dyn RelayLink>) -> Result<(Role, [u8; 32]), RelayError> {
 let frame = link.recv().await?;
 let (kind, body, _) = decode_handshake_frame(&frame)?;
 if kind != HandshakeType::Register {
 return Err(RelayError::ExpectedRegister);
 }
 let (req, signature) = register::decode(body)?;
 let message = register::signed_message(req.session_id, req.role);
 if !verify(&req.identity, &message, &signature) {
 return Err(RelayError::BadSignature);
 }
 Ok((req.role, req.session_id))
 }

 /// Forward frames read from `from` onto `to` until `from` closes, an
 /// oversize frame arrives, or the rate cap drops the session.
 async fn pump(
 &self,
 from: &Arc<dyn RelayLink>,
 to: &Arc<dyn RelayLink>,
 state: &Arc<PairedState>,
 role: Role) -> Result<(), RelayError> {
 loop {
 tokio::select! {
 () = state.cancel.cancelled() => return Ok(()),
 frame = from.recv() => {
 match frame {
 Ok(body) => {
 if body.len() > self.config.max_frame_size {
 state.cancel.cancel();
 let _ = to.send(close_frame()).await;
 return Err(RelayError::FrameTooLarge(body.len(), self.config.max_frame_size));
 }
 if !state.bucket.try_take(body.len() as u64).await {
 state.rate_dropped.fetch_add(1, Ordering::Relaxed);
 continue;
 }
 let counter = match role {
 Role::A => &state.bytes_a_to_b,
 Role::B => &state.bytes_b_to_a,
 };
 counter.fetch_add(body.len() as u64, Ordering::Relaxed);
 if to.send(body).await.is_err() {
 state.cancel.cancel();
 return Err(RelayError::Closed);
 }
 }
 Err(_) => {
 state.cancel.cancel();
 let _ = to.send(close_frame()).await;
 return Ok(());
 }
 }
 }
 }
 }
 }
}

fn close_frame() -> Vec<u8> {
 encode_handshake_frame(HandshakeType::Close, &[]).expect("empty body never exceeds the frame bound")
}

#[cfg(test)]
mod tests {
 use super::*;
 use shadowmesh_crypto::signatures::{generate_identity, sign};
 use tokio::sync::mpsc;

 struct ChanLink {
 tx: mpsc::Sender<Vec<u8>>,
 rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
 }

 #[async_trait::async_trait]
 impl RelayLink for ChanLink {
 async fn send(&self, body: Vec<u8>) -> Result<(), RelayError> {
 self.tx.send(body).await.map_err(|_| RelayError::Closed)
 }

 async fn recv(&self) -> Result<Vec<u8>, RelayError> {
 self.rx.lock().await.recv().await.ok_or(RelayError::Closed)
 }

 async fn close(&self) -> Result<(), RelayError> {
 Ok(())
 }
 }

 fn channel_pair() -> (Arc<ChanLink>, mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
 let (to_link_tx, to_link_rx) = mpsc::channel(16);
 let (from_link_tx, from_link_rx) = mpsc::channel(16);
 let link = Arc::new(ChanLink {
 tx: from_link_tx,
 rx: tokio::sync::Mutex::new(to_link_rx),
 });
 (link, to_link_tx, from_link_rx)
 }

 fn register_frame(session_id: [u8; 32], role: Role) -> Vec<u8> {
 let (pk, sk) = generate_identity();
 let message = register::signed_message(session_id, role);
 let sig = sign(&sk, &message).unwrap();
 let body = register::encode(session_id, role, &pk, &sig);
 encode_handshake_frame(HandshakeType::Register, &body).unwrap()
 }

 #[tokio::test]
 async fn paired_peers_exchange_frames_both_ways() {
 let server = Arc::new(RelayServer::new(RelayConfig::default()));
 let session_id = [1u8; 32];

 let (a_link, a_send_in, mut a_recv_out) = channel_pair();
 let (b_link, b_send_in, mut b_recv_out) = channel_pair();

 a_send_in.send(register_frame(session_id, Role::A)).await.unwrap();
 b_send_in.send(register_frame(session_id, Role::B)).await.unwrap();

 let server_a = Arc::clone(&server);
 let a_task = tokio::spawn(async move { server_a.handle_link(a_link).await });
 let server_b = Arc::clone(&server);
 let b_task = tokio::spawn(async move { server_b.handle_link(b_link).await });

 a_send_in.send(b"hello from a".to_vec()).await.unwrap();
 let forwarded = b_recv_out.recv().await.unwrap();
 assert_eq!(forwarded, b"hello from a");

 b_send_in.send(b"hello from b".to_vec()).await.unwrap();
 let forwarded = a_recv_out.recv().await.unwrap();
 assert_eq!(forwarded, b"hello from b");

 drop(a_send_in);
 let a_result = a_task.await.unwrap();
 assert!(a_result.is_ok());
 // b's pump should see a CLOSE frame pushed onto its outbound channel.
 let close = b_recv_out.recv().await.unwrap();
 let (kind, _, _) = decode_handshake_frame(&close).unwrap();
 assert_eq!(kind, HandshakeType::Close);
 drop(b_send_in);
 let _ = b_task.await.unwrap();
 }

 #[tokio::test]
 async fn unpaired_registration_times_out() {
 let server = Arc::new(RelayServer::new(RelayConfig {
 pairing_timeout: Duration::from_millis(20),
..RelayConfig::default()
 }));
 let (link, send_in, _recv_out) = channel_pair();
 send_in.send(register_frame([2u8; 32], Role::A)).await.unwrap();

 let cleanup = server.spawn_cleanup_task();
 let result = server.handle_link(link).await;
 assert!(matches!(result, Err(RelayError::PairingTimeout)));
 cleanup.abort();
 }

 #[tokio::test]
 async fn oversize_frame_closes_the_session() {
 let server = Arc::new(RelayServer::new(RelayConfig {
 max_frame_size: 8,
..RelayConfig::default()
 }));
 let session_id = [3u8; 32];
 let (a_link, a_send_in, _a_recv_out) = channel_pair();
 let (b_link, b_send_in, mut b_recv_out) = channel_pair();

 a_send_in.send(register_frame(session_id, Role::A)).await.unwrap();
 b_send_in.send(register_frame(session_id, Role::B)).await.unwrap();

 let server_b = Arc::clone(&server);
 let b_task = tokio::spawn(async move { server_b.handle_link(b_link).await });

 a_send_in.send(vec![0u8; 9]).await.unwrap();
 let a_result = server.handle_link(a_link).await;
 assert!(matches!(a_result, Err(RelayError::FrameTooLarge(9, 8))));

 let close = b_recv_out.recv().await.unwrap();
 let (kind, _, _) = decode_handshake_frame(&close).unwrap();
 assert_eq!(kind, HandshakeType::Close);
 drop(b_send_in);
 let _ = b_task.await.unwrap();
 }

 #[tokio::test]
 async fn rate_limited_frames_are_dropped_not_forwarded() {
 let server = Arc::new(RelayServer::new(RelayConfig {
 rate_limit: RateLimiterConfig {
 rate_bytes_per_sec: 100.0,
 burst_bytes: 2.0,
 },
..RelayConfig::default()
 }));
 let session_id = [4u8; 32];
 let (a_link, a_send_in, _a_recv_out) = channel_pair();
 let (b_link, b_send_in, mut b_recv_out) = channel_pair();

 a_send_in.send(register_frame(session_id, Role::A)).await.unwrap();
 b_send_in.send(register_frame(session_id, Role::B)).await.unwrap();

 let server_a = Arc::clone(&server);
 let a_task = tokio::spawn(async move { server_a.handle_link(a_link).await });
 let server_b = Arc::clone(&server);
 let b_task = tokio::spawn(async move { server_b.handle_link(b_link).await });

 a_send_in.send(b"ab".to_vec()).await.unwrap();
 let first = b_recv_out.recv().await.unwrap();
 assert_eq!(first, b"ab");

 // Burst just exhausted: this frame is dropped, not forwarded.
 a_send_in.send(b"cd".to_vec()).await.unwrap();
 tokio::time::sleep(Duration::from_millis(50)).await;
 a_send_in.send(b"ef".to_vec()).await.unwrap();
 let second = b_recv_out.recv().await.unwrap();
 assert_eq!(second, b"ef");

 let metrics = server.session_metrics(&session_id).await.unwrap();
 assert_eq!(metrics.rate_dropped, 1);

 drop(a_send_in);
 drop(b_send_in);
 let _ = a_task.await.unwrap();
 let _ = b_task.await.unwrap();
 }
}
