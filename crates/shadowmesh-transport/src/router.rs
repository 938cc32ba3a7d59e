//! Frame router: decoupled egress/ingress pumps.
//!
//! Two tasks per direction, connected by a bounded channel, so a momentary
//! stall in the transport never blocks the NIC reader and vice versa (a
//! single-loop pump is the performance regression this architecture
//! avoids). On a full channel the producer drops the frame and counts it;
//! this is backpressure-by-loss, the conventional choice for L2/L3
//! overlays.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use shadowmesh_protocol::Session;

/// Both pumps, and the supervisor's rotation barrier, share one session
/// behind a single lock. `Session::seal`/`Session::open` only touch atomics
/// and an in-memory AEAD call under the lock (no await points), so
/// contention is negligible; this is what lets `Session::rotate` act as a
/// hard barrier without a separate coordination mechanism.
pub type SharedSession = Arc<Mutex<Session>>;

use crate::error::TransportError;
use crate::nic::{VirtualNic, WriteOutcome};

/// Default egress/ingress channel depth before [`bdp_packets`] has been
/// computed for a session.
///
/// [`bdp_packets`]: crate::datagram::bdp_packets
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Counters a caller can sample to observe router health without locking
/// anything on the hot path.
#[derive(Default)]
pub struct RouterStats {
 egress_dropped: AtomicU64,
 ingress_dropped: AtomicU64,
 seal_failures: AtomicU64,
 open_failures: AtomicU64,
}

impl RouterStats {
 #[must_use]
 pub fn egress_dropped(&self) -> u64 {
 self.egress_dropped.load(Ordering::Relaxed)
 }
 #[must_use]
 pub fn ingress_dropped(&self) -> u64 {
 self.ingress_dropped.load(Ordering::Relaxed)
 }
 #[must_use]
 pub fn seal_failures(&self) -> u64 {
 self.seal_failures.load(Ordering::Relaxed)
 }
 #[must_use]
 pub fn open_failures(&self) -> u64 {
 self.open_failures.load(Ordering::Relaxed)
 }
}

/// A transport-bound sealed frame plus the sequence number the caller's
/// framing already carries.
pub struct OutboundFrame {
 pub seq: u64,
 pub ciphertext: Vec<u8>,
}

/// What the ingress pump hands the decrypt-and-deliver worker: the frame's
/// carried sequence and its wire body. When the session has IP-header
/// preservation enabled, `ciphertext` is the full `[hdr_len ‖ header ‖ ct]`
/// body `Session::open_ip_packet` expects; otherwise it is the bare AEAD
/// ciphertext.
pub struct InboundFrame {
 pub seq: u64,
 pub ciphertext: Vec<u8>,
}

/// A running pair of egress/ingress pumps for one session. Dropping this
/// (or cancelling `cancel`) tears both down.
pub struct FrameRouter {
 pub stats: Arc<RouterStats>,
 cancel: CancellationToken,
 tasks: Vec<JoinHandle<()>>,
}

impl FrameRouter {
 /// Spawn the egress pump: NIC reads feed a bounded channel; a second
 /// task seals each packet via `session` and calls `send` (the
 /// transport's outbound hook).
 pub fn spawn_egress<N, S, Fut>(
 nic: Arc<N>,
 session: SharedSession,
 send: S,
 queue_depth: usize,
 stats: Arc<RouterStats>,
 cancel: CancellationToken) -> Self
 where
 N: VirtualNic + ?Sized + 'static,
 S: Fn(OutboundFrame) -> Fut + Send + Sync + 'static,
 Fut: std::future::Future<Output = Result<(), TransportError>> + Send,
 {
 let (reader_tx, mut rx) = mpsc::channel::<Vec<u8>>(queue_depth);

 let reader_stats = Arc::clone(&stats);
 let reader_cancel = cancel.clone();
 let reader_nic = Arc::clone(&nic);
 let reader = tokio::spawn(async move {
 loop {
 let packet = tokio::select! {
 _ = reader_cancel.cancelled() => break,
 result = reader_nic.read_packet() => match result {
 Ok(packet) => packet,
 Err(_) => break,
 },
 };
 if reader_tx.try_send(packet).is_err() {
 reader_stats.egress_dropped.fetch_add(1, Ordering::Relaxed);
 }
 }
 });

 let sealer_stats = Arc::clone(&stats);
 let sealer_cancel = cancel.clone();
 let sealer = tokio::spawn(async move {
 loop {
 let packet = tokio::select! {
 _ = sealer_cancel.cancelled() => break,
 item = rx.recv() => match item {
 Some(packet) => packet,
 None => break,
 },
 };
 let sealed = {
 let session = session.lock().await;
 if session.ip_header_preservation() {
 session.seal_ip_packet(&packet)
 } else {
 session.seal(&packet, b"")
 }
 };
 match sealed {
 Ok(frame) => {
 if send(OutboundFrame { seq: frame.seq, ciphertext: frame.ciphertext })
.await
.is_err()
 {
 break;
 }
 }
 Err(_) => {
 sealer_stats.seal_failures.fetch_add(1, Ordering::Relaxed);
 }
 }
 }
 });

 Self {
 stats,
 cancel,
 tasks: vec![reader, sealer],
 }
 }

 /// Spawn the ingress pump: a channel fed by the transport's receive
 /// loop (via the returned sender) drains into a worker that opens each
 /// frame via `session` and calls `nic.write_packet`.
 pub fn spawn_ingress<N>(
 nic: Arc<N>,
 session: SharedSession,
 queue_depth: usize,
 stats: Arc<RouterStats>,
 cancel: CancellationToken) -> (Self, mpsc::Sender<InboundFrame>)
 where
 N: VirtualNic + ?Sized + 'static,
 {
 let (tx, mut rx) = mpsc::channel::<InboundFrame>(queue_depth);

 let opener_stats = Arc::clone(&stats);
 let opener_cancel = cancel.clone();
 let opener = tokio::spawn(async move {
 loop {
 let frame = tokio::select! {
 _ = opener_cancel.cancelled() => break,
 item = rx.recv() => match item {
 Some(frame) => frame,
 None => break,
 },
 };

 let opened = {
 let mut session = session.lock().await;
 if session.ip_header_preservation() {
 session.open_ip_packet(frame.seq, &frame.ciphertext)
 } else {
 session.open(frame.seq, &frame.ciphertext, b"")
 }
 };

 match opened {
 Ok(plaintext) => match nic.write_packet(plaintext) {
 WriteOutcome::Ok => {}
 WriteOutcome::FullQueue => {
 opener_stats.ingress_dropped.fetch_add(1, Ordering::Relaxed);
 }
 WriteOutcome::Closed => break,
 },
 Err(_) => {
 opener_stats.open_failures.fetch_add(1, Ordering::Relaxed);
 }
 }
 }
 });

 (
 Self {
 stats,
 cancel,
 tasks: vec![opener],
 },
 tx)
 }

 /// Signal cancellation and wait for both tasks to finish.
 pub async fn shutdown(self) {
 self.cancel.cancel();
 for task in self.tasks {
 let _ = task.await;
 }
 }
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::nic::ChannelNic;
 use shadowmesh_crypto::signatures;
 use shadowmesh_protocol::handshake::{Initiator, Responder};
 use tokio::sync::mpsc::error::TryRecvError;
 use tokio::time::{timeout, Duration};

 fn established_pair() -> (Session, Session) {
 let (i_pub, i_sec) = signatures::generate_identity();
 let (r_pub, r_sec) = signatures::generate_identity();
 let relay_id = r_pub.identity();

 let mut initiator = Initiator::new(i_pub, i_sec);
 let mut responder = Responder::new(r_pub, r_sec, relay_id).unwrap();

 let hello = initiator.start(1_700_000_000).unwrap();
 let challenge = responder.on_hello(&hello, 1_700_000_000).unwrap();
 let response = initiator.on_challenge(&challenge).unwrap();
 responder.on_response(&response).unwrap();
 let (established, responder_session) =
 responder.build_established(1500, 30, 3600, false).unwrap();
 let initiator_session = initiator.on_established(&established).unwrap();

 (
 Session::from_established(&initiator_session).unwrap(),
 Session::from_established(&responder_session).unwrap())
 }

 #[tokio::test]
 async fn egress_pump_seals_nic_reads_and_forwards_them() {
 let (sender_session, _receiver_session) = established_pair();
 let session: SharedSession = Arc::new(Mutex::new(sender_session));

 let (nic, inbound_tx, _outbound_rx) = ChannelNic::new(1500, 8);
 let nic = Arc::new(nic);
 let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(8);
 let stats = Arc::new(RouterStats::default());
 let cancel = CancellationToken::new();

 let router = FrameRouter::spawn_egress(
 nic,
 session,
 move |frame| {
 let out_tx = out_tx.clone();
 async move { out_tx.send(frame).await.map_err(|_| TransportError::Closed) }
 },
 DEFAULT_QUEUE_DEPTH,
 stats,
 cancel);

 inbound_tx.send(b"hello nic".to_vec()).await.unwrap();
 let sealed = timeout(Duration::from_secs(1), out_rx.recv())
.await
.expect("egress produced no frame")
.expect("channel closed");
 assert_eq!(sealed.seq, 1);
 assert_ne!(sealed.ciphertext, b"hello nic");

 router.shutdown().await;
 }

 #[tokio::test]
 async fn ingress_pump_opens_frames_and_writes_to_nic() {
 let (sender_session, receiver_session) = established_pair();
 let sender: SharedSession = Arc::new(Mutex::new(sender_session));
 let receiver: SharedSession = Arc::new(Mutex::new(receiver_session));

 let sealed = {
 let sender = sender.lock().await;
 sender.seal(b"payload for the nic", b"").unwrap()
 };

 let (nic, _inbound_tx, mut outbound_rx) = ChannelNic::new(1500, 8);
 let nic = Arc::new(nic);
 let stats = Arc::new(RouterStats::default());
 let cancel = CancellationToken::new();

 let (router, in_tx) = FrameRouter::spawn_ingress(
 Arc::clone(&nic),
 receiver,
 DEFAULT_QUEUE_DEPTH,
 stats,
 cancel);

 in_tx
.send(InboundFrame {
 seq: sealed.seq,
 ciphertext: sealed.ciphertext,
 })
.await
.unwrap();

 let delivered = timeout(Duration::from_secs(1), outbound_rx.recv())
.await
.expect("ingress produced no delivery")
.expect("channel closed");
 assert_eq!(delivered, b"payload for the nic");
 assert!(matches!(outbound_rx.try_recv(), Err(TryRecvError::Empty)));

 router.shutdown().await;
 }
}
