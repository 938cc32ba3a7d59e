//! Per-peer circuit breaker and reconnect backoff.
//!
//! A per-peer state machine (`Closed` → `Open` → `HalfOpen`) guarding
//! whether a new connection attempt is even worth making, paired with the
//! exponential backoff schedule used for `Connecting`/`Failed` retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Circuit state for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
 /// Connection attempts proceed normally.
 Closed,
 /// Recent failures exceeded the threshold; attempts are short-circuited
 /// until `timeout` elapses.
 Open,
 /// `timeout` elapsed; the next attempt is allowed through as a probe.
 HalfOpen,
}

/// Thresholds governing one peer's circuit.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
 /// Consecutive failures before the circuit opens.
 pub failure_threshold: u32,
 /// How long the circuit stays open before allowing a probe.
 pub timeout: Duration,
 /// Consecutive probe successes before the circuit fully closes.
 pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
 fn default() -> Self {
 Self {
 failure_threshold: 5,
 timeout: Duration::from_secs(30),
 success_threshold: 2,
 }
 }
}

#[derive(Debug)]
struct PeerCircuit {
 state: CircuitState,
 failure_count: u32,
 success_count: u32,
 last_transition: Instant,
 total_failures: u64,
 total_successes: u64,
 open_count: u64,
}

impl PeerCircuit {
 fn new() -> Self {
 Self {
 state: CircuitState::Closed,
 failure_count: 0,
 success_count: 0,
 last_transition: Instant::now(),
 total_failures: 0,
 total_successes: 0,
 open_count: 0,
 }
 }
}

/// Point-in-time counters for one peer's circuit, for observability.
#[derive(Debug, Clone, Copy)]
pub struct CircuitMetrics {
 /// Current state.
 pub state: CircuitState,
 /// Lifetime failure count.
 pub total_failures: u64,
 /// Lifetime success count.
 pub total_successes: u64,
 /// Number of times the circuit has opened.
 pub open_count: u64,
}

/// Tracks a circuit per peer identity, keyed by the peer's 32-byte
/// ML-DSA-87 identity.
pub struct CircuitBreaker {
 config: CircuitBreakerConfig,
 circuits: Arc<RwLock<HashMap<[u8; 32], PeerCircuit>>>,
}

impl CircuitBreaker {
 /// Build a breaker with `config` thresholds.
 #[must_use]
 pub fn new(config: CircuitBreakerConfig) -> Self {
 Self {
 config,
 circuits: Arc::new(RwLock::new(HashMap::new())),
 }
 }

 /// Whether a new connection attempt to `peer` should proceed.
 pub async fn allows_request(&self, peer: &[u8; 32]) -> bool {
 let mut circuits = self.circuits.write().await;
 let circuit = circuits.entry(*peer).or_insert_with(PeerCircuit::new);
 match circuit.state {
 CircuitState::Closed => true,
 CircuitState::HalfOpen => true,
 CircuitState::Open => {
 if circuit.last_transition.elapsed() >= self.config.timeout {
 circuit.state = CircuitState::HalfOpen;
 circuit.last_transition = Instant::now();
 true
 } else {
 false
 }
 }
 }
 }

 /// Record a successful connection/handshake for `peer`.
 pub async fn record_success(&self, peer: &[u8; 32]) {
 let mut circuits = self.circuits.write().await;
 let circuit = circuits.entry(*peer).or_insert_with(PeerCircuit::new);
 circuit.total_successes += 1;
 match circuit.state {
 CircuitState::Closed => {
 circuit.failure_count = 0;
 }
 CircuitState::HalfOpen => {
 circuit.success_count += 1;
 if circuit.success_count >= self.config.success_threshold {
 circuit.state = CircuitState::Closed;
 circuit.failure_count = 0;
 circuit.success_count = 0;
 circuit.last_transition = Instant::now();
 }
 }
 CircuitState::Open => {}
 }
 }

 /// Record a failed connection/handshake for `peer`.
 pub async fn record_failure(&self, peer: &[u8; 32]) {
 let mut circuits = self.circuits.write().await;
 let circuit = circuits.entry(*peer).or_insert_with(PeerCircuit::new);
 circuit.total_failures += 1;
 match circuit.state {
 CircuitState::Closed => {
 circuit.failure_count += 1;
 if circuit.failure_count >= self.config.failure_threshold {
 circuit.state = CircuitState::Open;
 circuit.last_transition = Instant::now();
 circuit.open_count += 1;
 }
 }
 CircuitState::HalfOpen => {
 circuit.state = CircuitState::Open;
 circuit.success_count = 0;
 circuit.last_transition = Instant::now();
 circuit.open_count += 1;
 }
 CircuitState::Open => {}
 }
 }

 /// Current state for `peer`, defaulting to `Closed` if never seen.
 pub async fn state(&self, peer: &[u8; 32]) -> CircuitState {
 let circuits = self.circuits.read().await;
 circuits.get(peer).map_or(CircuitState::Closed, |c| c.state)
 }

 /// Snapshot metrics for `peer`.
 pub async fn metrics(&self, peer: &[u8; 32]) -> CircuitMetrics {
 let circuits = self.circuits.read().await;
 circuits.get(peer).map_or(
 CircuitMetrics {
 state: CircuitState::Closed,
 total_failures: 0,
 total_successes: 0,
 open_count: 0,
 },
 |c| CircuitMetrics {
 state: c.state,
 total_failures: c.total_failures,
 total_successes: c.total_successes,
 open_count: c.open_count,
 })
 }

 /// Drop all state for `peer`.
 pub async fn remove(&self, peer: &[u8; 32]) {
 self.circuits.write().await.remove(peer);
 }
}

/// Exponential backoff schedule for `Connecting`/`Failed` retries:
/// `min(60 s, 2^n)`, with `n` capped at 6.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
 /// Cap on the backoff exponent; beyond this, the delay plateaus.
 pub max_exponent: u32,
 /// Ceiling on the computed delay.
 pub max_backoff: Duration,
}

impl Default for RetryConfig {
 fn default() -> Self {
 Self {
 max_exponent: 6,
 max_backoff: Duration::from_secs(60),
 }
 }
}

impl RetryConfig {
 /// Backoff delay before retry attempt number `attempt` (0-indexed).
 #[must_use]
 pub fn backoff_duration(&self, attempt: u32) -> Duration {
 let exponent = attempt.min(self.max_exponent);
 let seconds = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
 Duration::from_secs(seconds).min(self.max_backoff)
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[tokio::test]
 async fn circuit_opens_after_threshold_and_half_opens_after_timeout() {
 let breaker = CircuitBreaker::new(CircuitBreakerConfig {
 failure_threshold: 3,
 timeout: Duration::from_millis(10),
 success_threshold: 1,
 });
 let peer = [7u8; 32];

 for _ in 0..3 {
 assert!(breaker.allows_request(&peer).await);
 breaker.record_failure(&peer).await;
 }
 assert_eq!(breaker.state(&peer).await, CircuitState::Open);
 assert!(!breaker.allows_request(&peer).await);

 tokio::time::sleep(Duration::from_millis(15)).await;
 assert!(breaker.allows_request(&peer).await);
 assert_eq!(breaker.state(&peer).await, CircuitState::HalfOpen);

 breaker.record_success(&peer).await;
 assert_eq!(breaker.state(&peer).await, CircuitState::Closed);
 }

 #[tokio::test]
 async fn half_open_failure_reopens_the_circuit() {
 let breaker = CircuitBreaker::new(CircuitBreakerConfig {
 failure_threshold: 1,
 timeout: Duration::from_millis(5),
 success_threshold: 2,
 });
 let peer = [9u8; 32];

 breaker.record_failure(&peer).await;
 assert_eq!(breaker.state(&peer).await, CircuitState::Open);
 tokio::time::sleep(Duration::from_millis(10)).await;
 assert!(breaker.allows_request(&peer).await);
 breaker.record_failure(&peer).await;
 assert_eq!(breaker.state(&peer).await, CircuitState::Open);
 }

 #[test]
 fn backoff_doubles_until_the_cap() {
 let retry = RetryConfig::default();
 assert_eq!(retry.backoff_duration(0), Duration::from_secs(1));
 assert_eq!(retry.backoff_duration(1), Duration::from_secs(2));
 assert_eq!(retry.backoff_duration(6), Duration::from_secs(60));
 assert_eq!(retry.backoff_duration(20), Duration::from_secs(60));
 }
}
