//! TCP/TLS accept loop for the relay.
//!
//! A single `accept` loop that hands each connection to its own task. One
//! accepted TCP connection is one registering client, so there is no shared
//! socket to demultiplex by source address.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::relay::RelayServer;

/// Bind-and-serve loop: accept TCP connections, complete the TLS/WebSocket
/// upgrade, and hand each resulting link to [`RelayServer::handle_link`] on
/// its own task.
///
/// Runs until `cancel` fires. Individual connection failures are logged and
/// do not stop the loop.
pub async fn serve(
 server: Arc<RelayServer>,
 listener: TcpListener,
 tls_acceptor: TlsAcceptor,
 cancel: CancellationToken) {
 let _cleanup = server.spawn_cleanup_task();
 loop {
 tokio::select! {
 () = cancel.cancelled() => return,
 accepted = listener.accept() => {
 let (tcp, addr) = match accepted {
 Ok(pair) => pair,
 Err(e) => {
 tracing::warn!(error = %e, "failed to accept relay connection");
 continue;
 }
 };
 let server = Arc::clone(&server);
 let tls_acceptor = tls_acceptor.clone();
 tokio::spawn(async move {
 let transport = match shadowmesh_transport::reliable::accept(tcp, tls_acceptor).await {
 Ok(t) => t,
 Err(e) => {
 tracing::warn!(error = %e, %addr, "relay handshake upgrade failed");
 return;
 }
 };
 let link: Arc<dyn crate::link::RelayLink> = Arc::new(transport);
 if let Err(e) = server.handle_link(link).await {
 tracing::debug!(error = %e, %addr, "relay session ended");
 }
 });
 }
 }
 }
}
