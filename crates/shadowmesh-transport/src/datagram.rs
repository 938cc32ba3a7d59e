//! Datagram transport: UDP.
//!
//! Best-effort, out-of-order delivery up to the session MTU. Outbound
//! frames carry a monotonic sequence number; the inbound path tracks the
//! last-seen sequence and counts gaps as loss. RTT is measured out-of-band
//! via unencrypted `ECHO_REQ`/`ECHO_REPLY` frames.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use shadowmesh_protocol::frame::{self, DatagramHeader, DatagramType};

use crate::error::{TransportError, TransportResult};

/// Socket buffer size, sized to absorb the bandwidth-delay product of
/// high-throughput, high-RTT links.
pub const SOCKET_BUFFER_SIZE: usize = 128 * 1024 * 1024;

/// How often RTT probes (`ECHO_REQ`) are sent.
pub const RTT_PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// Number of samples the rolling RTT average is computed over.
const RTT_SAMPLE_WINDOW: usize = 10;

/// Default target bandwidth used by the adaptive BDP formula.
pub const DEFAULT_TARGET_BANDWIDTH_BPS: u64 = 100_000_000;

const BDP_MIN_PACKETS: u64 = 256;
const BDP_MAX_PACKETS: u64 = 8192;

/// `bdp_packets = clamp(256, 8192, (bandwidth_bps * rtt_s) / (avg_packet_size * 8))`.
/// Recomputed at handshake completion and on each ±2× RTT change by the
/// caller (the frame router).
#[must_use]
pub fn bdp_packets(bandwidth_bps: u64, rtt: Duration, avg_packet_size_bytes: u64) -> u64 {
 if avg_packet_size_bytes == 0 {
 return BDP_MIN_PACKETS;
 }
 let raw = (bandwidth_bps as f64 * rtt.as_secs_f64()) / (avg_packet_size_bytes as f64 * 8.0);
 (raw.max(0.0).round() as u64).clamp(BDP_MIN_PACKETS, BDP_MAX_PACKETS)
}

/// Rolling average over the last [`RTT_SAMPLE_WINDOW`] RTT samples.
pub struct RttTracker {
 samples: Mutex<VecDeque<Duration>>,
}

impl RttTracker {
 #[must_use]
 pub fn new() -> Self {
 Self {
 samples: Mutex::new(VecDeque::with_capacity(RTT_SAMPLE_WINDOW)),
 }
 }

 pub async fn record(&self, sample: Duration) {
 let mut samples = self.samples.lock().await;
 if samples.len() == RTT_SAMPLE_WINDOW {
 samples.pop_front();
 }
 samples.push_back(sample);
 }

 pub async fn average(&self) -> Option<Duration> {
 let samples = self.samples.lock().await;
 if samples.is_empty() {
 return None;
 }
 let total: Duration = samples.iter().sum();
 Some(total / samples.len() as u32)
 }
}

impl Default for RttTracker {
 fn default() -> Self {
 Self::new()
 }
}

/// A bound UDP socket driving one session's datagram path.
pub struct DatagramTransport {
 socket: UdpSocket,
 tx_seq: AtomicU64,
 rx_high_seq: AtomicU64,
 gap_count: AtomicU64,
 rtt: RttTracker,
}

impl DatagramTransport {
 /// Bind a UDP socket at `local`, requesting [`SOCKET_BUFFER_SIZE`] kernel
 /// buffers in both directions.
 ///
 /// # Errors
 /// Returns [`TransportError::BindFailed`] if the socket cannot be
 /// created or bound.
 pub async fn bind(local: SocketAddr) -> TransportResult<Self> {
 let domain = if local.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
 let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
.map_err(|e| TransportError::BindFailed(e.to_string()))?;

 if let Err(e) = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
 tracing::warn!(error = %e, "kernel refused requested receive buffer size");
 }
 if let Err(e) = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
 tracing::warn!(error = %e, "kernel refused requested send buffer size");
 }
 socket
.set_nonblocking(true)
.map_err(|e| TransportError::BindFailed(e.to_string()))?;
 socket
.bind(&local.into())
.map_err(|e| TransportError::BindFailed(e.to_string()))?;

 let std_socket: std::net::UdpSocket = socket.into();
 let socket = UdpSocket::from_std(std_socket).map_err(TransportError::Io)?;

 Ok(Self {
 socket,
 tx_seq: AtomicU64::new(1),
 rx_high_seq: AtomicU64::new(0),
 gap_count: AtomicU64::new(0),
 rtt: RttTracker::new(),
 })
 }

 /// The address this socket is bound to.
 ///
 /// # Errors
 /// Returns [`TransportError::Io`] if the local address cannot be read.
 pub fn local_addr(&self) -> TransportResult<SocketAddr> {
 self.socket.local_addr().map_err(TransportError::Io)
 }

 /// Seal-agnostic send of a `DATA` frame: wraps `payload` (already
 /// sealed by [`shadowmesh_protocol::Session`]) with the next sequence
 /// number.
 ///
 /// # Errors
 /// Returns [`TransportError::Io`] if the underlying send fails.
 pub async fn send_data(&self, peer: SocketAddr, payload: &[u8]) -> TransportResult<u64> {
 let seq = self.tx_seq.fetch_add(1, Ordering::Relaxed);
 let frame = frame::encode_datagram(seq, DatagramType::Data, 0, payload)
.map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
 self.socket.send_to(&frame, peer).await?;
 Ok(seq)
 }

 /// Send an RTT probe. Unencrypted: only the current timestamp rides the
 /// wire, nothing session-specific.
 ///
 /// # Errors
 /// Returns [`TransportError::Io`] if the underlying send fails.
 pub async fn send_echo_req(&self, peer: SocketAddr) -> TransportResult<()> {
 let frame = frame::encode_datagram(0, DatagramType::EchoReq, now_micros(), &[])
.map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
 self.socket.send_to(&frame, peer).await?;
 Ok(())
 }

 /// Receive the next datagram. `ECHO_REQ` frames are answered
 /// transparently; `ECHO_REPLY` frames feed the RTT tracker. `DATA`
 /// frames update the loss-gap counter. The caller still gets the parsed
 /// header and raw buffer length for every frame, including control
 /// frames, so callers needing only application data should match on
 /// `header.kind`.
 ///
 /// # Errors
 /// Returns [`TransportError::InvalidConfig`] if the datagram doesn't
 /// parse as a valid frame header, or [`TransportError::Io`] on a socket
 /// error.
 pub async fn recv(&self, buf: &mut [u8]) -> TransportResult<(DatagramHeader, usize, SocketAddr)> {
 let (len, from) = self.socket.recv_from(buf).await?;
 let header = DatagramHeader::decode(&buf[..len])
.map_err(|e| TransportError::InvalidConfig(e.to_string()))?;

 match header.kind {
 DatagramType::EchoReq => {
 let reply =
 frame::encode_datagram(0, DatagramType::EchoReply, header.timestamp, &[])
.map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
 self.socket.send_to(&reply, from).await?;
 }
 DatagramType::EchoReply => {
 let now = now_micros();
 if now > header.timestamp {
 self.rtt.record(Duration::from_micros(now - header.timestamp)).await;
 }
 }
 DatagramType::Data => self.track_gap(header.seq),
 }

 Ok((header, len, from))
 }

 fn track_gap(&self, seq: u64) {
 let prev = self.rx_high_seq.fetch_max(seq, Ordering::AcqRel);
 if prev != 0 && seq > prev + 1 {
 self.gap_count.fetch_add(seq - prev - 1, Ordering::Relaxed);
 }
 }

 /// Total gaps observed in the inbound sequence, counted as loss.
 pub fn gap_count(&self) -> u64 {
 self.gap_count.load(Ordering::Relaxed)
 }

 /// Rolling average RTT, or `None` before the first sample arrives.
 pub async fn average_rtt(&self) -> Option<Duration> {
 self.rtt.average().await
 }
}

fn now_micros() -> u64 {
 SystemTime::now()
.duration_since(UNIX_EPOCH)
.unwrap_or_default()
.as_micros() as u64
}
