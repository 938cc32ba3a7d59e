//! # ShadowMesh Transport
//!
//! The virtual-NIC adapter, the two wire transports (WebSocket-over-TLS for
//! handshake/control traffic, UDP for the encrypted data plane), and the
//! frame router that pumps packets between them through a live
//! [`shadowmesh_protocol::Session`].
//!
//! This crate owns I/O and scheduling; it never decides *when* to connect,
//! rotate, or migrate (that's `shadowmesh-supervisor`).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod datagram;
pub mod error;
pub mod nic;
pub mod reliable;
pub mod router;

pub use error::{TransportError, TransportResult};
pub use nic::VirtualNic;
pub use router::{FrameRouter, SharedSession};
