//! Virtual-NIC adapter.
//!
//! The core treats the NIC as a producer/consumer of opaque byte frames no
//! larger than the session MTU. Nothing here understands IP, Ethernet, or
//! any framing above "here is a packet"; `shadowmesh-protocol` handles the
//! crypto side and the caller handles routing.

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::TransportError;

/// Outcome of a non-blocking write to a [`VirtualNic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
 /// The packet was accepted.
 Ok,
 /// The NIC's internal queue is at capacity; the caller should drop and
 /// count, not retry inline.
 FullQueue,
 /// The NIC has been closed.
 Closed,
}

/// A producer/consumer of opaque byte frames, each no larger than [`mtu`].
///
/// [`mtu`]: VirtualNic::mtu
#[async_trait]
pub trait VirtualNic: Send + Sync {
 /// Yield one frame. May suspend indefinitely while the device is idle.
 ///
 /// # Errors
 /// Returns [`TransportError::Closed`] once the device has been torn
 /// down.
 async fn read_packet(&self) -> Result<Vec<u8>, TransportError>;

 /// Hand a frame to the device. Never blocks.
 fn write_packet(&self, packet: Vec<u8>) -> WriteOutcome;

 /// The negotiated MTU; packets larger than this are rejected.
 fn mtu(&self) -> u16;
}

/// Pool of MTU-sized buffers, lent to the NIC reader and returned once
/// transport-side sealing has copied the payload out.
///
/// A fixed-capacity free list guarded by a single lock, falling back to a
/// fresh allocation when the pool is exhausted rather than blocking the
/// caller.
pub struct BufferPool {
 mtu: usize,
 capacity: usize,
 free: StdMutex<VecDeque<Vec<u8>>>,
}

impl BufferPool {
 /// Build a pool of `capacity` buffers, each pre-allocated to `mtu` bytes.
 #[must_use]
 pub fn new(mtu: usize, capacity: usize) -> Self {
 let mut free = VecDeque::with_capacity(capacity);
 for _ in 0..capacity {
 free.push_back(vec![0u8; mtu]);
 }
 Self {
 mtu,
 capacity,
 free: StdMutex::new(free),
 }
 }

 /// Take a buffer from the pool, allocating a new one if it is empty.
 #[must_use]
 pub fn acquire(&self) -> Vec<u8> {
 let mut free = self.free.lock().expect("buffer pool mutex poisoned");
 free.pop_front().unwrap_or_else(|| vec![0u8; self.mtu])
 }

 /// Return a buffer to the pool, clearing it first. Buffers beyond the
 /// pool's configured capacity are dropped rather than retained.
 pub fn release(&self, mut buf: Vec<u8>) {
 buf.clear();
 buf.resize(self.mtu, 0);
 let mut free = self.free.lock().expect("buffer pool mutex poisoned");
 if free.len() < self.capacity {
 free.push_back(buf);
 }
 }

 /// Number of buffers currently checked in.
 pub fn available(&self) -> usize {
 self.free.lock().expect("buffer pool mutex poisoned").len()
 }
}

/// In-memory [`VirtualNic`] backed by channels, used in tests and to wire
/// two supervisors together without a real TUN device.
pub struct ChannelNic {
 mtu: u16,
 inbound: Mutex<mpsc::Receiver<Vec<u8>>>,
 outbound: mpsc::Sender<Vec<u8>>,
}

impl ChannelNic {
 /// Build a `ChannelNic` and return the two ends a test harness drives:
 /// `inbound_tx` feeds packets that `read_packet` will yield, and
 /// `outbound_rx` receives whatever is handed to `write_packet`.
 #[must_use]
 pub fn new(mtu: u16, capacity: usize) -> (Self, mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
 let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
 let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
 (
 Self {
 mtu,
 inbound: Mutex::new(inbound_rx),
 outbound: outbound_tx,
 },
 inbound_tx,
 outbound_rx)
 }
}

#[async_trait]
impl VirtualNic for ChannelNic {
 async fn read_packet(&self) -> Result<Vec<u8>, TransportError> {
 let mut inbound = self.inbound.lock().await;
 inbound.recv().await.ok_or(TransportError::Closed)
 }

 fn write_packet(&self, packet: Vec<u8>) -> WriteOutcome {
 if packet.len() > self.mtu as usize {
 return WriteOutcome::FullQueue;
 }
 match self.outbound.try_send(packet) {
 Ok(()) => WriteOutcome::Ok,
 Err(mpsc::error::TrySendError::Full(_)) => WriteOutcome::FullQueue,
 Err(mpsc::error::TrySendError::Closed(_)) => WriteOutcome::Closed,
 }
 }

 fn mtu(&self) -> u16 {
 self.mtu
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn buffer_pool_reuses_released_buffers() {
 let pool = BufferPool::new(1500, 4);
 assert_eq!(pool.available(), 4);
 let buf = pool.acquire();
 assert_eq!(pool.available(), 3);
 assert_eq!(buf.len(), 1500);
 pool.release(buf);
 assert_eq!(pool.available(), 4);
 }

 #[test]
 fn buffer_pool_allocates_past_capacity_without_growing() {
 let pool = BufferPool::new(64, 1);
 let a = pool.acquire();
 let b = pool.acquire();
 assert_eq!(a.len(), 64);
 assert_eq!(b.len(), 64);
 pool.release(a);
 pool.release(b);
 assert_eq!(pool.available(), 1);
 }

 #[tokio::test]
 async fn channel_nic_roundtrips_packets() {
 let (nic, inbound_tx, mut outbound_rx) = ChannelNic::new(1500, 8);
 inbound_tx.send(vec![1, 2, 3]).await.unwrap();
 let read = nic.read_packet().await.unwrap();
 assert_eq!(read, vec![1, 2, 3]);

 assert_eq!(nic.write_packet(vec![4, 5, 6]), WriteOutcome::Ok);
 assert_eq!(outbound_rx.recv().await.unwrap(), vec![4, 5, 6]);
 }

 #[tokio::test]
 async fn channel_nic_rejects_oversize_write() {
 let (nic, _inbound_tx, _outbound_rx) = ChannelNic::new(16, 8);
 assert_eq!(nic.write_packet(vec![0u8; 17]), WriteOutcome::FullQueue);
 }

 #[tokio::test]
 async fn channel_nic_read_fails_closed_once_sender_dropped() {
 let (nic, inbound_tx, _outbound_rx) = ChannelNic::new(1500, 8);
 drop(inbound_tx);
 let err = nic.read_packet().await.unwrap_err();
 assert!(matches!(err, TransportError::Closed));
 }
}
