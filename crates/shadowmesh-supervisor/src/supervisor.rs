//! Connection supervisor: drives one peer relationship through its full
//! lifecycle.
//!
//! ```text
//! Disconnected -> Connecting -> Handshaking -> Connected -> { Rotating, Migrating, Closing }
//! ```
//!
//! This module never speaks to a socket directly. It drives a
//! [`ControlChannel`] (the reliable, framed control plane a
//! [`Connector`] hands it) through the handshake and rotation exchanges,
//! and wires a [`FrameRouter`] between a [`VirtualNic`] and an
//! externally supplied egress sink for the data plane. A state machine with
//! its own backoff/circuit-breaker gate, queryable from outside via a
//! broadcast of its current state.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use shadowmesh_crypto::signatures::{SigPublicKey, SigSecretKey};
use shadowmesh_protocol::frame::HandshakeType;
use shadowmesh_protocol::handshake::{Initiator, Responder};
use shadowmesh_protocol::rotation::{RotationInitiator, RotationResponder};
use shadowmesh_protocol::Session;
use shadowmesh_transport::router::{FrameRouter, InboundFrame, OutboundFrame, RouterStats, SharedSession};
use shadowmesh_transport::VirtualNic;

use crate::circuit_breaker::{CircuitBreaker, RetryConfig};
use crate::error::SupervisorError;

/// A boxed, `'static` future, to keep the plugin points below usable as
/// trait objects instead of exploding this module's generic parameters.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The framed control-plane connection the supervisor drives the
/// handshake, rotation and close exchanges over (conventionally backed by
/// `shadowmesh_transport::reliable::ReliableTransport`).
#[async_trait::async_trait]
pub trait ControlChannel: Send + Sync {
 /// Send one framed control message.
 async fn send(&self, kind: HandshakeType, body: Vec<u8>) -> Result<(), SupervisorError>;
 /// Receive the next framed control message.
 async fn recv(&self) -> Result<(HandshakeType, Vec<u8>), SupervisorError>;
 /// Send a heartbeat ping on this channel.
 async fn heartbeat(&self) -> Result<(), SupervisorError>;
}

/// Produces a fresh [`ControlChannel`] for a connection attempt.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
 /// Dial (or accept) and return a ready control channel.
 async fn connect(&self) -> Result<Arc<dyn ControlChannel>, SupervisorError>;
}

/// Callback the egress pump hands each sealed data-plane frame to
/// (conventionally backed by `shadowmesh_transport::datagram::DatagramTransport`).
pub type EgressSend = Arc<dyn Fn(OutboundFrame) -> BoxFuture<Result<(), SupervisorError>> + Send + Sync>;

/// Which side of the four-message handshake this supervisor drives.
pub enum Role {
 /// This side opens the handshake.
 Initiator,
 /// This side answers, binding the transcript to `relay_or_peer_id`.
 Responder {
 /// This side's own identity, or the relay's when negotiating a
 /// relayed session.
 relay_or_peer_id: [u8; 32],
 },
}

/// Non-identity knobs for one supervised connection.
#[derive(Clone)]
pub struct SupervisorConfig {
 /// Budget for establishing the control channel.
 pub connect_timeout: Duration,
 /// Budget for each individual handshake step.
 pub handshake_timeout: Duration,
 /// Negotiated MTU, offered by the responder in ESTABLISHED.
 pub mtu: u16,
 /// Heartbeat interval, in seconds, offered by the responder.
 pub heartbeat_s: u16,
 /// Key-rotation interval, in seconds, offered by the responder.
 pub rotation_s: u32,
 /// Whether to negotiate IP-header-preservation mode.
 pub ip_header_preservation: bool,
 /// Egress/ingress channel depth for the frame router.
 pub queue_depth: usize,
 /// Backoff schedule for `Connecting`/`Failed` retries.
 pub retry: RetryConfig,
 /// Grace period before a cancelled `Closing` connection is torn down
 /// unconditionally.
 pub close_grace: Duration,
}

impl Default for SupervisorConfig {
 fn default() -> Self {
 Self {
 connect_timeout: Duration::from_secs(10),
 handshake_timeout: Duration::from_secs(10),
 mtu: 1500,
 heartbeat_s: 30,
 rotation_s: 3600,
 ip_header_preservation: false,
 queue_depth: shadowmesh_transport::router::DEFAULT_QUEUE_DEPTH,
 retry: RetryConfig::default(),
 close_grace: Duration::from_secs(5),
 }
 }
}

/// Current position of one supervised connection in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
 /// No connection attempt in flight.
 Disconnected,
 /// Dialing/accepting the control channel.
 Connecting,
 /// Control channel is up; running the four-message handshake.
 Handshaking,
 /// Session established; data plane pumping.
 Connected,
 /// Swapping to freshly rotated keys.
 Rotating,
 /// Swapping the egress path to a new validated route.
 Migrating,
 /// Tearing down; `close_grace` has started or elapsed.
 Closing,
 /// Handshake failed in a way retries can't fix (`AuthMismatch`).
 Failed,
}

struct RouterHandle {
 egress: FrameRouter,
 ingress: FrameRouter,
 ingress_tx: mpsc::Sender<InboundFrame>,
 cancel: CancellationToken,
}

/// Drives one peer connection end-to-end.
pub struct ConnectionSupervisor {
 role: Role,
 identity_pub: SigPublicKey,
 identity_sec: SigSecretKey,
 config: SupervisorConfig,
 breaker: Option<Arc<CircuitBreaker>>,
 state_tx: watch::Sender<SupervisorState>,
 router: Mutex<Option<RouterHandle>>,
 router_stats: Arc<RouterStats>,
}

fn now_unix_s() -> u64 {
 SystemTime::now()
.duration_since(UNIX_EPOCH)
.map(|d| d.as_secs())
.unwrap_or(0)
}

impl ConnectionSupervisor {
 /// Build a supervisor for one peer connection, returning it alongside a
 /// receiver that observes every state transition.
 #[must_use]
 pub fn new(
 role: Role,
 identity_pub: SigPublicKey,
 identity_sec: SigSecretKey,
 config: SupervisorConfig,
 breaker: Option<Arc<CircuitBreaker>>) -> (Arc<Self>, watch::Receiver<SupervisorState>) {
 let (state_tx, state_rx) = watch::channel(SupervisorState::Disconnected);
 (
 Arc::new(Self {
 role,
 identity_pub,
 identity_sec,
 config,
 breaker,
 state_tx,
 router: Mutex::new(None),
 router_stats: Arc::new(RouterStats::default()),
 }),
 state_rx)
 }

 /// Current state.
 #[must_use]
 pub fn state(&self) -> SupervisorState {
 *self.state_tx.borrow()
 }

 /// Router egress/ingress counters, valid once [`Self::run`] reaches
 /// `Connected`.
 #[must_use]
 pub fn router_stats(&self) -> Arc<RouterStats> {
 Arc::clone(&self.router_stats)
 }

 fn set_state(&self, state: SupervisorState) {
 tracing::debug!(?state, "supervisor state transition");
 let _ = self.state_tx.send(state);
 }

 /// Drive the connection: connect with backoff, handshake, then pump
 /// the data plane until `cancel` fires. Returns only on cancellation or
 /// an unretryable failure (`AuthMismatch`).
 ///
 /// `peer_id` identifies the remote for circuit-breaker bookkeeping.
 pub async fn run(
 self: Arc<Self>,
 peer_id: [u8; 32],
 connector: Arc<dyn Connector>,
 nic: Arc<dyn VirtualNic>,
 egress_send: EgressSend,
 cancel: CancellationToken) -> Result<(), SupervisorError> {
 let mut attempt: u32 = 0;
 loop {
 if cancel.is_cancelled() {
 self.set_state(SupervisorState::Closing);
 return Ok(());
 }

 let channel = match self.connect_with_backoff(&peer_id, &connector, &cancel, &mut attempt).await? {
 Some(channel) => channel,
 None => {
 self.set_state(SupervisorState::Closing);
 return Ok(());
 }
 };

 self.set_state(SupervisorState::Handshaking);
 let established = match timeout(
 self.config.handshake_timeout,
 self.run_handshake(channel.as_ref()))
.await
 {
 Ok(Ok(established)) => established,
 Ok(Err(SupervisorError::AuthMismatch)) => {
 if let Some(breaker) = &self.breaker {
 breaker.record_failure(&peer_id).await;
 }
 self.set_state(SupervisorState::Failed);
 return Err(SupervisorError::AuthMismatch);
 }
 Ok(Err(err)) => {
 tracing::warn!(%err, "handshake failed, retrying");
 if let Some(breaker) = &self.breaker {
 breaker.record_failure(&peer_id).await;
 }
 attempt += 1;
 continue;
 }
 Err(_) => {
 tracing::warn!("handshake timed out, retrying");
 if let Some(breaker) = &self.breaker {
 breaker.record_failure(&peer_id).await;
 }
 attempt += 1;
 continue;
 }
 };

 if let Some(breaker) = &self.breaker {
 breaker.record_success(&peer_id).await;
 }
 attempt = 0;

 let session: SharedSession = Arc::new(Mutex::new(established));
 self.spawn_router(Arc::clone(&nic), Arc::clone(&session), Arc::clone(&egress_send))
.await;
 self.set_state(SupervisorState::Connected);

 let outcome = self.pump(Arc::clone(&channel), session, &cancel).await;
 self.teardown_router().await;

 match outcome {
 PumpOutcome::Cancelled => {
 self.set_state(SupervisorState::Closing);
 let _ = channel.send(HandshakeType::Close, Vec::new()).await;
 return Ok(());
 }
 PumpOutcome::TransportFailed => {
 tracing::warn!("control channel failed, reconnecting");
 if let Some(breaker) = &self.breaker {
 breaker.record_failure(&peer_id).await;
 }
 continue;
 }
 }
 }
 }

 async fn connect_with_backoff(
 &self,
 peer_id: &[u8; 32],
 connector: &Arc<dyn Connector>,
 cancel: &CancellationToken,
 attempt: &mut u32) -> Result<Option<Arc<dyn ControlChannel>>, SupervisorError> {
 loop {
 if let Some(breaker) = &self.breaker {
 if !breaker.allows_request(peer_id).await {
 let delay = self.config.retry.backoff_duration(*attempt);
 tokio::select! {
 _ = cancel.cancelled() => return Ok(None),
 _ = tokio::time::sleep(delay) => {}
 }
 continue;
 }
 }

 self.set_state(SupervisorState::Connecting);
 let attempt_result = tokio::select! {
 _ = cancel.cancelled() => return Ok(None),
 result = timeout(self.config.connect_timeout, connector.connect()) => result,
 };

 match attempt_result {
 Ok(Ok(channel)) => return Ok(Some(channel)),
 Ok(Err(err)) => {
 tracing::warn!(%err, "connect failed");
 }
 Err(_) => {
 tracing::warn!("connect timed out");
 }
 }
 if let Some(breaker) = &self.breaker {
 breaker.record_failure(peer_id).await;
 }
 let delay = self.config.retry.backoff_duration(*attempt);
 *attempt += 1;
 tokio::select! {
 _ = cancel.cancelled() => return Ok(None),
 _ = tokio::time::sleep(delay) => {}
 }
 }
 }

 async fn run_handshake(&self, channel: &dyn ControlChannel) -> Result<Session, SupervisorError> {
 match &self.role {
 Role::Initiator => self.run_handshake_initiator(channel).await,
 Role::Responder { relay_or_peer_id } => {
 self.run_handshake_responder(channel, *relay_or_peer_id).await
 }
 }
 }

 async fn run_handshake_initiator(&self, channel: &dyn ControlChannel) -> Result<Session, SupervisorError> {
 let mut initiator = Initiator::new(self.identity_pub.clone(), self.identity_sec.clone());
 let hello = initiator
.start(now_unix_s())
.map_err(|e| SupervisorError::HandshakeRetryable(e.to_string()))?;
 channel.send(HandshakeType::Hello, hello).await?;

 let (kind, body) = channel.recv().await?;
 if kind != HandshakeType::Challenge {
 return Err(SupervisorError::HandshakeRetryable(format!(
 "expected CHALLENGE, got {kind:?}"
 )));
 }
 let response = initiator.on_challenge(&body).map_err(map_handshake_error)?;
 channel.send(HandshakeType::Response, response).await?;

 let (kind, body) = channel.recv().await?;
 if kind != HandshakeType::Established {
 return Err(SupervisorError::HandshakeRetryable(format!(
 "expected ESTABLISHED, got {kind:?}"
 )));
 }
 let established = initiator.on_established(&body).map_err(map_handshake_error)?;
 Session::from_established(&established)
.map_err(|e| SupervisorError::HandshakeRetryable(e.to_string()))
 }

 async fn run_handshake_responder(
 &self,
 channel: &dyn ControlChannel,
 relay_or_peer_id: [u8; 32]) -> Result<Session, SupervisorError> {
 let mut responder = Responder::new(self.identity_pub.clone(), self.identity_sec.clone(), relay_or_peer_id)
.map_err(map_handshake_error)?;

 let (kind, body) = channel.recv().await?;
 if kind != HandshakeType::Hello {
 return Err(SupervisorError::HandshakeRetryable(format!(
 "expected HELLO, got {kind:?}"
 )));
 }
 let challenge = responder
.on_hello(&body, now_unix_s())
.map_err(map_handshake_error)?;
 channel.send(HandshakeType::Challenge, challenge).await?;

 let (kind, body) = channel.recv().await?;
 if kind != HandshakeType::Response {
 return Err(SupervisorError::HandshakeRetryable(format!(
 "expected RESPONSE, got {kind:?}"
 )));
 }
 responder.on_response(&body).map_err(map_handshake_error)?;

 let (established_body, established_session) = responder
.build_established(
 self.config.mtu,
 self.config.heartbeat_s,
 self.config.rotation_s,
 self.config.ip_header_preservation)
.map_err(map_handshake_error)?;
 channel.send(HandshakeType::Established, established_body).await?;

 Session::from_established(&established_session)
.map_err(|e| SupervisorError::HandshakeRetryable(e.to_string()))
 }

 async fn spawn_router(&self, nic: Arc<dyn VirtualNic>, session: SharedSession, egress_send: EgressSend) {
 let cancel = CancellationToken::new();
 let egress = FrameRouter::spawn_egress(
 Arc::clone(&nic),
 Arc::clone(&session),
 move |frame| {
 let egress_send = Arc::clone(&egress_send);
 async move { egress_send(frame).await.map_err(|_| shadowmesh_transport::TransportError::Closed) }
 },
 self.config.queue_depth,
 Arc::clone(&self.router_stats),
 cancel.clone());
 let (ingress, ingress_tx) = FrameRouter::spawn_ingress(
 nic,
 session,
 self.config.queue_depth,
 Arc::clone(&self.router_stats),
 cancel.clone());
 *self.router.lock().await = Some(RouterHandle {
 egress,
 ingress,
 ingress_tx,
 cancel,
 });
 }

 async fn teardown_router(&self) {
 if let Some(handle) = self.router.lock().await.take() {
 handle.cancel.cancel();
 handle.egress.shutdown().await;
 handle.ingress.shutdown().await;
 }
 }

 /// Swap the data-plane egress path without touching the session's keys
 /// or sequence numbers: pause by tearing
 /// down the current pumps, then respawn against the same `session` and
 /// `nic` with a new `egress_send`.
 pub async fn migrate(&self, nic: Arc<dyn VirtualNic>, session: SharedSession, egress_send: EgressSend) {
 self.set_state(SupervisorState::Migrating);
 self.teardown_router().await;
 self.spawn_router(nic, session, egress_send).await;
 self.set_state(SupervisorState::Connected);
 }

 /// Feed a frame received off the data-plane transport into the running
 /// ingress pump. No-op if the router isn't currently spawned.
 pub async fn deliver_inbound(&self, frame: InboundFrame) {
 if let Some(handle) = self.router.lock().await.as_ref() {
 let _ = handle.ingress_tx.send(frame).await;
 }
 }

 async fn pump(&self, channel: Arc<dyn ControlChannel>, session: SharedSession, cancel: &CancellationToken) -> PumpOutcome {
 let mut heartbeat_tick = interval(Duration::from_secs(u64::from(self.config.heartbeat_s).max(1)));
 heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
 let mut rotation_tick = interval(Duration::from_secs(u64::from(self.config.rotation_s).max(1)));
 rotation_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
 heartbeat_tick.tick().await;
 rotation_tick.tick().await;

 loop {
 tokio::select! {
 _ = cancel.cancelled() => return PumpOutcome::Cancelled,
 _ = heartbeat_tick.tick() => {
 if channel.heartbeat().await.is_err() {
 return PumpOutcome::TransportFailed;
 }
 let needs_rotation = session.lock().await.needs_rotation();
 if needs_rotation {
 if self.rotate(channel.as_ref(), &session).await.is_err() {
 return PumpOutcome::TransportFailed;
 }
 }
 }
 _ = rotation_tick.tick() => {
 if self.rotate(channel.as_ref(), &session).await.is_err() {
 return PumpOutcome::TransportFailed;
 }
 }
 }
 }
 }

 async fn rotate(&self, channel: &dyn ControlChannel, session: &SharedSession) -> Result<(), SupervisorError> {
 self.set_state(SupervisorState::Rotating);
 let result = match &self.role {
 Role::Initiator => {
 let (req_body, rotation_initiator) = RotationInitiator::start();
 channel.send(HandshakeType::RotateReq, req_body).await?;
 let (kind, body) = channel.recv().await?;
 if kind != HandshakeType::RotateAck {
 return Err(SupervisorError::RotationFailed(format!(
 "expected ROTATE_ACK, got {kind:?}"
 )));
 }
 let mut session = session.lock().await;
 rotation_initiator
.on_ack(&body, &mut session)
.map_err(|e| SupervisorError::RotationFailed(e.to_string()))
 }
 Role::Responder {.. } => {
 let (kind, body) = channel.recv().await?;
 if kind != HandshakeType::RotateReq {
 return Err(SupervisorError::RotationFailed(format!(
 "expected ROTATE_REQ, got {kind:?}"
 )));
 }
 let mut session = session.lock().await;
 let ack_body = RotationResponder::on_req(&body, &mut session)
.map_err(|e| SupervisorError::RotationFailed(e.to_string()))?;
 drop(session);
 channel.send(HandshakeType::RotateAck, ack_body).await
 }
 };
 self.set_state(SupervisorState::Connected);
 result
 }
}

enum PumpOutcome {
 Cancelled,
 TransportFailed,
}

fn map_handshake_error(err: shadowmesh_protocol::error::HandshakeError) -> SupervisorError {
 use shadowmesh_protocol::error::HandshakeError;
 match err {
 HandshakeError::AuthMismatch => SupervisorError::AuthMismatch,
 other => SupervisorError::HandshakeRetryable(other.to_string()),
 }
}

#[cfg(test)]
mod tests {
 use super::*;
 use shadowmesh_crypto::signatures;
 use shadowmesh_transport::nic::ChannelNic;
 use tokio::time::{timeout, Duration};

 struct ChanHalf {
 tx: mpsc::Sender<(HandshakeType, Vec<u8>)>,
 rx: Mutex<mpsc::Receiver<(HandshakeType, Vec<u8>)>>,
 }

 #[async_trait::async_trait]
 impl ControlChannel for ChanHalf {
 async fn send(&self, kind: HandshakeType, body: Vec<u8>) -> Result<(), SupervisorError> {
 self.tx
.send((kind, body))
.await
.map_err(|_| SupervisorError::TransportFailure("peer channel closed".into()))
 }

 async fn recv(&self) -> Result<(HandshakeType, Vec<u8>), SupervisorError> {
 self.rx
.lock()
.await
.recv()
.await
.ok_or_else(|| SupervisorError::TransportFailure("peer channel closed".into()))
 }

 async fn heartbeat(&self) -> Result<(), SupervisorError> {
 Ok(())
 }
 }

 fn channel_pair() -> (Arc<ChanHalf>, Arc<ChanHalf>) {
 let (a_tx, b_rx) = mpsc::channel(16);
 let (b_tx, a_rx) = mpsc::channel(16);
 (
 Arc::new(ChanHalf { tx: a_tx, rx: Mutex::new(a_rx) }),
 Arc::new(ChanHalf { tx: b_tx, rx: Mutex::new(b_rx) }))
 }

 struct StaticConnector(Mutex<Option<Arc<dyn ControlChannel>>>);

 #[async_trait::async_trait]
 impl Connector for StaticConnector {
 async fn connect(&self) -> Result<Arc<dyn ControlChannel>, SupervisorError> {
 self.0
.lock()
.await
.take()
.ok_or_else(|| SupervisorError::ConnectFailed("already consumed".into()))
 }
 }

 #[tokio::test]
 async fn run_handshake_responder_rejects_tampered_hello() {
 let (i_pub, i_sec) = signatures::generate_identity();
 let (r_pub, r_sec) = signatures::generate_identity();
 let relay_id = r_pub.identity();

 let mut initiator = Initiator::new(i_pub, i_sec);
 let mut hello = initiator.start(now_unix_s()).unwrap();
 let last = hello.len() - 1;
 hello[last] ^= 0xFF;

 let (a, b) = channel_pair();
 a.send(HandshakeType::Hello, hello).await.unwrap();

 let (sup, _state) = ConnectionSupervisor::new(
 Role::Responder { relay_or_peer_id: relay_id },
 r_pub,
 r_sec,
 SupervisorConfig::default(),
 None);
 let err = sup
.run_handshake_responder(b.as_ref(), relay_id)
.await
.unwrap_err();
 assert!(matches!(err, SupervisorError::AuthMismatch));
 }

 #[tokio::test]
 async fn full_run_reaches_connected_and_pumps_a_packet_each_way() {
 let (i_pub, i_sec) = signatures::generate_identity();
 let (r_pub, r_sec) = signatures::generate_identity();
 let relay_id = r_pub.identity();

 let (i_chan, r_chan) = channel_pair();

 let mut config = SupervisorConfig::default();
 config.heartbeat_s = 3600;
 config.rotation_s = 3600;

 let (initiator_sup, mut initiator_state) =
 ConnectionSupervisor::new(Role::Initiator, i_pub, i_sec, config.clone(), None);
 let (responder_sup, _responder_state) = ConnectionSupervisor::new(
 Role::Responder { relay_or_peer_id: relay_id },
 r_pub,
 r_sec,
 config,
 None);

 let (i_nic, i_inbound_tx, _i_outbound_rx) = ChannelNic::new(1500, 8);
 let (r_nic, _r_inbound_tx, mut r_outbound_rx) = ChannelNic::new(1500, 8);
 let i_nic: Arc<dyn VirtualNic> = Arc::new(i_nic);
 let r_nic: Arc<dyn VirtualNic> = Arc::new(r_nic);

 let (deliver_tx, mut deliver_rx) = mpsc::channel::<OutboundFrame>(8);

 let i_cancel = CancellationToken::new();
 let r_cancel = CancellationToken::new();

 let i_connector: Arc<dyn Connector> = Arc::new(StaticConnector(Mutex::new(Some(i_chan))));
 let r_connector: Arc<dyn Connector> = Arc::new(StaticConnector(Mutex::new(Some(r_chan))));

 let i_send: EgressSend = Arc::new(move |frame| {
 let deliver_tx = deliver_tx.clone();
 Box::pin(async move {
 deliver_tx
.send(frame)
.await
.map_err(|_| SupervisorError::TransportFailure("closed".into()))
 })
 });
 let r_send: EgressSend = Arc::new(|_frame: OutboundFrame| Box::pin(async move { Ok(()) }));

 let i_task = tokio::spawn(initiator_sup.clone().run(
 relay_id,
 i_connector,
 i_nic,
 i_send,
 i_cancel.clone()));
 let r_task = tokio::spawn(responder_sup.clone().run(
 relay_id,
 r_connector,
 r_nic,
 r_send,
 r_cancel.clone()));

 initiator_state
.wait_for(|s| *s == SupervisorState::Connected)
.await
.expect("initiator reached Connected");

 i_inbound_tx.send(b"across the overlay".to_vec()).await.unwrap();
 let sealed = timeout(Duration::from_secs(1), deliver_rx.recv())
.await
.expect("egress produced no frame")
.expect("deliver channel closed");

 responder_sup
.deliver_inbound(InboundFrame { seq: sealed.seq, ciphertext: sealed.ciphertext })
.await;

 let delivered = timeout(Duration::from_secs(1), r_outbound_rx.recv())
.await
.expect("ingress produced no delivery")
.expect("outbound channel closed");
 assert_eq!(delivered, b"across the overlay");

 i_cancel.cancel();
 r_cancel.cancel();
 i_task.await.unwrap().unwrap();
 r_task.await.unwrap().unwrap();
 }

 #[test]
 fn backoff_retry_config_is_exposed_for_custom_schedules() {
 let retry = RetryConfig::default();
 assert_eq!(retry.backoff_duration(0), Duration::from_secs(1));
 }
}
