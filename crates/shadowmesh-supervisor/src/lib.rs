//! # ShadowMesh Supervisor
//!
//! The connection state machine: backoff/circuit-breaker gated connects,
//! the handshake and rotation exchanges, and the migrate/close paths that
//! turn a bare [`shadowmesh_protocol::Session`] into a live, supervised
//! peer connection.
//!
//! This crate decides *when*, not how: it never owns a socket. Dialing, accepting,
//! and pumping bytes belong to `shadowmesh-transport`; this crate drives
//! that machinery through [`ConnectionSupervisor::run`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod circuit_breaker;
pub mod error;
pub mod supervisor;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig};
pub use error::SupervisorError;
pub use supervisor::{ConnectionSupervisor, ControlChannel, Connector, Role, SupervisorConfig, SupervisorState};
