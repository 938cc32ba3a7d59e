//! Post-handshake encrypted session state.
//!
//! `Session` owns the two directional [`AeadKey`]s, the lock-free outbound
//! sequence/nonce counter, and the single-owner inbound replay window. It
//! never touches the network itself: transports call [`Session::seal`] on
//! egress and [`Session::open`] on ingress, passing the sequence number
//! carried in their own framing (reliable-channel length prefix or
//! [`crate::frame::DatagramHeader`]).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use shadowmesh_crypto::aead::{aead_open, aead_seal, AeadKey};
use shadowmesh_crypto::hash::sha256;
use shadowmesh_crypto::nonce::NonceGenerator;
use shadowmesh_crypto::CryptoError;

use crate::error::SessionError;
use crate::handshake::EstablishedSession;

/// How long a receiver keeps accepting frames under the pre-rotation key
/// after [`Session::rotate`] has installed the new one.
pub const ROTATION_GRACE: Duration = Duration::from_secs(5);

/// A sealed frame ready to hand to a transport.
pub struct SealedFrame {
 /// The sequence number consumed for this frame; transports carry this
 /// in their own framing (datagram header `seq`, or an explicit field
 /// on the reliable channel).
 pub seq: u64,
 /// AEAD ciphertext plus tag.
 pub ciphertext: Vec<u8>,
}

/// Sliding 64-bit replay window over a monotonic sequence number.
#[derive(Clone)]
struct ReplayWindow {
 highest: u64,
 bitmap: u64,
}

impl ReplayWindow {
 const WIDTH: u64 = 64;

 fn new() -> Self {
 Self {
 highest: 0,
 bitmap: 0,
 }
 }

 /// Returns `true` if `seq` is new and should be accepted, updating the
 /// window as a side effect. Returns `false` for a duplicate within the
 /// window or a frame older than the window (both are reported to the
 /// caller as [`SessionError::Replay`], but the caller may distinguish
 /// them via [`Self::is_too_old`] for logging/counters).
 fn check_and_update(&mut self, seq: u64) -> bool {
 if seq == 0 {
 return false;
 }
 if seq > self.highest {
 let shift = seq - self.highest;
 self.bitmap = if shift >= Self::WIDTH {
 0
 } else {
 self.bitmap << shift
 };
 self.bitmap |= 1;
 self.highest = seq;
 return true;
 }
 let age = self.highest - seq;
 if age >= Self::WIDTH {
 return false;
 }
 let bit = 1u64 << age;
 if self.bitmap & bit != 0 {
 return false;
 }
 self.bitmap |= bit;
 true
 }

 fn is_too_old(&self, seq: u64) -> bool {
 seq == 0 || (seq <= self.highest && self.highest - seq >= Self::WIDTH)
 }
}

/// Pre-rotation key material kept alive for [`ROTATION_GRACE`] so frames
/// already in flight when the peer rotates aren't dropped as auth failures.
struct GraceKey {
 rx_key: AeadKey,
 rx_salt: [u8; 6],
 window: ReplayWindow,
 expires_at: Instant,
}

/// 16-byte key-commitment tag mixed into AAD, binding each sealed frame to
/// the exact key it was sealed under.
fn key_commitment(key: &AeadKey) -> [u8; 16] {
 let digest = sha256(key.as_bytes());
 let mut out = [0u8; 16];
 out.copy_from_slice(&digest[..16]);
 out
}

fn committed_aad(key: &AeadKey, seq: u64, aad: &[u8]) -> Vec<u8> {
 let commitment = key_commitment(key);
 let mut out = Vec::with_capacity(commitment.len() + 8 + aad.len());
 out.extend_from_slice(&commitment);
 out.extend_from_slice(&seq.to_be_bytes());
 out.extend_from_slice(aad);
 out
}

/// One end of an established ShadowMesh session.
///
/// `tx_seq` and the nonce counter are both lock-free atomics so `seal` can
/// be called concurrently from multiple egress workers; `rx_seq` and the
/// replay bitmap have a single owner (the ingress task) and need no
/// synchronization.
pub struct Session {
 session_id: [u8; 32],
 tx_key: AeadKey,
 rx_key: AeadKey,
 rx_salt: [u8; 6],
 nonce_gen: NonceGenerator,
 tx_seq: AtomicU64,
 replay: ReplayWindow,
 grace: Option<GraceKey>,
 rotation_counter: u32,
 ip_header_preservation: bool,
 replay_drops: AtomicU64,
}

/// Derive this direction's 6-byte nonce salt from its AEAD key, so the peer
/// (who holds the same key under the opposite role) can reconstruct the
/// exact nonce a `seq` was sealed with, without either side ever
/// transmitting a salt. Unlike [`NonceGenerator::new()`]'s OS-random salt
/// (right for a generator nobody else needs to replicate), this is
/// deterministic precisely because the counterparty must replicate it.
fn derive_nonce_salt(key: &AeadKey) -> Result<[u8; 6], SessionError> {
 let bytes = shadowmesh_crypto::hash::hkdf(key.as_bytes(), &[], b"shadowmesh nonce salt", 6)?;
 let mut salt = [0u8; 6];
 salt.copy_from_slice(&bytes);
 Ok(salt)
}

impl Session {
 /// Number of frames the sliding replay window covers.
 pub const REPLAY_WINDOW: u64 = ReplayWindow::WIDTH;

 /// Build a session from the handshake's negotiated keys and session id.
 ///
 /// # Errors
 /// Returns [`SessionError::Crypto`] if the nonce generator's initial
 /// salt can't be drawn from the OS entropy source.
 pub fn from_established(established: &EstablishedSession) -> Result<Self, SessionError> {
 let tx_key = AeadKey::new(established.tx_key);
 let rx_key = AeadKey::new(established.rx_key);
 let tx_salt = derive_nonce_salt(&tx_key)?;
 let rx_salt = derive_nonce_salt(&rx_key)?;
 Ok(Self {
 session_id: established.session_id,
 tx_key,
 rx_key,
 rx_salt,
 nonce_gen: NonceGenerator::with_salt(tx_salt),
 tx_seq: AtomicU64::new(1),
 replay: ReplayWindow::new(),
 grace: None,
 rotation_counter: 0,
 ip_header_preservation: established.ip_header_preservation,
 replay_drops: AtomicU64::new(0),
 })
 }

 /// This session's id, chosen by the responder during the handshake.
 #[must_use]
 pub fn session_id(&self) -> &[u8; 32] {
 &self.session_id
 }

 /// Whether IP-header-preservation mode was negotiated for this session.
 #[must_use]
 pub fn ip_header_preservation(&self) -> bool {
 self.ip_header_preservation
 }

 /// Number of frames dropped as replayed or stale so far.
 #[must_use]
 pub fn replay_drops(&self) -> u64 {
 self.replay_drops.load(Ordering::Relaxed)
 }

 /// Whether the send-direction nonce counter has crossed the soft limit
 /// and rotation should be scheduled.
 #[must_use]
 pub fn needs_rotation(&self) -> bool {
 self.nonce_gen.past_soft_limit()
 }

 /// Seal `plaintext` for transmission, consuming the next `tx_seq` and
 /// nonce. Never fails except on nonce exhaustion, which the supervisor
 /// must have already pre-empted via [`Self::needs_rotation`].
 ///
 /// # Errors
 /// Returns [`SessionError::NonceExhaustion`] if the 48-bit nonce counter
 /// is exhausted; the caller must rotate before sealing again.
 pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<SealedFrame, SessionError> {
 let seq = self.tx_seq.fetch_add(1, Ordering::Relaxed);
 let nonce = self.nonce_gen.next_nonce().map_err(map_nonce_error)?;
 let aad = committed_aad(&self.tx_key, seq, aad);
 let ciphertext = aead_seal(&self.tx_key, &nonce, &aad, plaintext)?;
 Ok(SealedFrame { seq, ciphertext })
 }

 /// Open a frame sealed by the peer's [`Self::seal`].
 ///
 /// Checks the replay window before attempting decryption, so a forged
 /// `seq` can't be used to force costly AEAD work on every garbage
 /// packet.
 ///
 /// # Errors
 /// Returns [`SessionError::Replay`] for a duplicate or stale `seq`, or
 /// [`SessionError::AuthFailure`] if the tag doesn't verify.
 pub fn open(&mut self, seq: u64, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, SessionError> {
 if self.replay.check_and_update(seq) {
 let committed = committed_aad(&self.rx_key, seq, aad);
 let nonce = nonce_from_seq(seq, &self.rx_salt);
 match aead_open(&self.rx_key, &nonce, &committed, ciphertext) {
 Ok(plaintext) => return Ok(plaintext),
 Err(_) => return self.try_grace_key(seq, ciphertext, aad),
 }
 }
 self.replay_drops.fetch_add(1, Ordering::Relaxed);
 if self.replay.is_too_old(seq) {
 tracing::debug!(seq, "dropping frame older than replay window");
 } else {
 tracing::debug!(seq, "dropping duplicate frame");
 }
 Err(SessionError::Replay)
 }

 fn try_grace_key(
 &mut self,
 seq: u64,
 ciphertext: &[u8],
 aad: &[u8]) -> Result<Vec<u8>, SessionError> {
 let Some(grace) = self.grace.as_mut() else {
 return Err(SessionError::AuthFailure);
 };
 if Instant::now() >= grace.expires_at {
 self.grace = None;
 return Err(SessionError::AuthFailure);
 }
 if !grace.window.check_and_update(seq) {
 return Err(SessionError::AuthFailure);
 }
 let committed = committed_aad(&grace.rx_key, seq, aad);
 let nonce = nonce_from_seq(seq, &grace.rx_salt);
 aead_open(&grace.rx_key, &nonce, &committed, ciphertext).map_err(SessionError::from)
 }

 /// Rotate to new directional keys, resetting `tx_seq` to 1 and drawing
 /// a fresh nonce salt. The previous receive key stays valid for
 /// [`ROTATION_GRACE`] so frames the peer sealed just before rotating
 /// aren't lost. Must succeed on both peers in lock-step, driven by the
 /// `ROTATE_REQ`/`ROTATE_ACK` exchange on the reliable channel.
 ///
 /// # Errors
 /// Returns [`SessionError::Crypto`] if a fresh nonce salt can't be drawn
 /// from the OS entropy source.
 pub fn rotate(&mut self, new_tx_key: [u8; 32], new_rx_key: [u8; 32]) -> Result<(), SessionError> {
 let new_tx_key = AeadKey::new(new_tx_key);
 let new_rx_key = AeadKey::new(new_rx_key);
 let new_tx_salt = derive_nonce_salt(&new_tx_key)?;
 let new_rx_salt = derive_nonce_salt(&new_rx_key)?;

 let old_rx_key = std::mem::replace(&mut self.rx_key, new_rx_key);
 let old_rx_salt = std::mem::replace(&mut self.rx_salt, new_rx_salt);
 let old_window = std::mem::replace(&mut self.replay, ReplayWindow::new());
 self.grace = Some(GraceKey {
 rx_key: old_rx_key,
 rx_salt: old_rx_salt,
 window: old_window,
 expires_at: Instant::now() + ROTATION_GRACE,
 });

 self.tx_key = new_tx_key;
 self.tx_seq.store(1, Ordering::Relaxed);
 self.nonce_gen = NonceGenerator::with_salt(new_tx_salt);
 self.rotation_counter += 1;
 Ok(())
 }

 /// HKDF salt for the next rotation's directional-key derivation.
 #[must_use]
 pub fn rotation_salt(&self) -> Vec<u8> {
 let mut salt = Vec::with_capacity(36);
 salt.extend_from_slice(&self.session_id);
 salt.extend_from_slice(&self.rotation_counter.to_be_bytes());
 salt
 }

 /// Seal a routable IPv4 packet in IP-header-preservation mode: the header
 /// is kept in the clear as AAD so routers/firewalls can still forward the
 /// frame; only the IP payload is AEAD-sealed.
 ///
 /// # Errors
 /// Returns [`SessionError::Crypto`] if `ip_packet` is too short to
 /// contain a valid IPv4 header, or on nonce exhaustion.
 pub fn seal_ip_packet(&self, ip_packet: &[u8]) -> Result<SealedFrame, SessionError> {
 let hdr_len = ipv4_header_len(ip_packet)?;
 let (header, payload) = ip_packet.split_at(hdr_len);
 let mut sealed = self.seal(payload, header)?;
 let mut body = Vec::with_capacity(1 + header.len() + sealed.ciphertext.len());
 body.push(hdr_len as u8);
 body.extend_from_slice(header);
 body.append(&mut sealed.ciphertext);
 sealed.ciphertext = body;
 Ok(sealed)
 }

 /// Open an IP-header-preserving frame produced by
 /// [`Self::seal_ip_packet`], rewriting the IPv4 total-length field and
 /// recomputing the header checksum over the reassembled packet.
 ///
 /// # Errors
 /// Returns [`SessionError::AuthFailure`]/[`SessionError::Replay`] as
 /// [`Self::open`] would, or a crypto error if the declared header
 /// length doesn't fit in `frame_body`.
 pub fn open_ip_packet(&mut self, seq: u64, frame_body: &[u8]) -> Result<Vec<u8>, SessionError> {
 let hdr_len = *frame_body
.first()
.ok_or(SessionError::AuthFailure)? as usize;
 if frame_body.len() < 1 + hdr_len {
 return Err(SessionError::AuthFailure);
 }
 let header = &frame_body[1..1 + hdr_len];
 let ciphertext = &frame_body[1 + hdr_len..];
 let payload = self.open(seq, ciphertext, header)?;

 let mut packet = Vec::with_capacity(hdr_len + payload.len());
 packet.extend_from_slice(header);
 packet.extend_from_slice(&payload);
 rewrite_ipv4_total_length(&mut packet);
 Ok(packet)
 }
}

fn map_nonce_error(err: CryptoError) -> SessionError {
 match err {
 CryptoError::NonceExhaustion => SessionError::NonceExhaustion,
 other => SessionError::Crypto(other),
 }
}

/// Reconstruct the 12-byte AEAD nonce the sender used for `seq`, matching
/// the encoding [`NonceGenerator`] uses: `counter_be(6) ‖ salt(6)`. `salt`
/// is the peer's [`derive_nonce_salt`] output for the key this frame was
/// sealed under.
fn nonce_from_seq(seq: u64, salt: &[u8; 6]) -> [u8; 12] {
 let mut out = [0u8; 12];
 out[..6].copy_from_slice(&seq.to_be_bytes()[2..]);
 out[6..].copy_from_slice(salt);
 out
}

/// Parse the IHL (Internet Header Length) field of an IPv4 header and
/// return the header length in bytes.
fn ipv4_header_len(packet: &[u8]) -> Result<usize, SessionError> {
 let first = *packet.first().ok_or(SessionError::AuthFailure)?;
 let ihl = (first & 0x0F) as usize * 4;
 if ihl < 20 || packet.len() < ihl {
 return Err(SessionError::AuthFailure);
 }
 Ok(ihl)
}

/// Rewrite the IPv4 total-length field to match `packet`'s actual length
/// and recompute the header checksum over the result.
fn rewrite_ipv4_total_length(packet: &mut [u8]) {
 let Ok(hdr_len) = ipv4_header_len(packet) else {
 return;
 };
 let total_len = packet.len() as u16;
 packet[2..4].copy_from_slice(&total_len.to_be_bytes());
 packet[10] = 0;
 packet[11] = 0;
 let checksum = ipv4_checksum(&packet[..hdr_len]);
 packet[10..12].copy_from_slice(&checksum.to_be_bytes());
}

/// Standard one's-complement Internet checksum (RFC 791 §3.1) over an IPv4
/// header with the checksum field already zeroed.
fn ipv4_checksum(header: &[u8]) -> u16 {
 let mut sum: u32 = 0;
 let mut chunks = header.chunks_exact(2);
 for chunk in &mut chunks {
 sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
 }
 if let [last] = chunks.remainder() {
 sum += (*last as u32) << 8;
 }
 while sum >> 16 != 0 {
 sum = (sum & 0xFFFF) + (sum >> 16);
 }
 !(sum as u16)
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::handshake::{Initiator, Responder};
 use shadowmesh_crypto::signatures;

 fn established_pair() -> (EstablishedSession, EstablishedSession) {
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
 (initiator_session, responder_session)
 }

 #[test]
 fn seal_then_open_roundtrips() {
 let (i_session, r_session) = established_pair();
 let mut initiator = Session::from_established(&i_session).unwrap();
 let mut responder = Session::from_established(&r_session).unwrap();

 let sealed = initiator.seal(b"hello responder", b"").unwrap();
 let opened = responder
.open(sealed.seq, &sealed.ciphertext, b"")
.unwrap();
 assert_eq!(opened, b"hello responder");
 }

 #[test]
 fn duplicate_seq_is_rejected_as_replay() {
 let (i_session, r_session) = established_pair();
 let initiator = Session::from_established(&i_session).unwrap();
 let mut responder = Session::from_established(&r_session).unwrap();

 let sealed = initiator.seal(b"once", b"").unwrap();
 responder
.open(sealed.seq, &sealed.ciphertext, b"")
.unwrap();
 let err = responder
.open(sealed.seq, &sealed.ciphertext, b"")
.unwrap_err();
 assert!(matches!(err, SessionError::Replay));
 }

 #[test]
 fn frame_older_than_window_is_rejected() {
 let (i_session, r_session) = established_pair();
 let initiator = Session::from_established(&i_session).unwrap();
 let mut responder = Session::from_established(&r_session).unwrap();

 let stale = initiator.seal(b"stale", b"").unwrap();
 for _ in 0..Session::REPLAY_WINDOW + 1 {
 let sealed = initiator.seal(b"advance", b"").unwrap();
 responder
.open(sealed.seq, &sealed.ciphertext, b"")
.unwrap();
 }
 let err = responder
.open(stale.seq, &stale.ciphertext, b"")
.unwrap_err();
 assert!(matches!(err, SessionError::Replay));
 }

 #[test]
 fn tampered_ciphertext_fails_authentication() {
 let (i_session, r_session) = established_pair();
 let initiator = Session::from_established(&i_session).unwrap();
 let mut responder = Session::from_established(&r_session).unwrap();

 let mut sealed = initiator.seal(b"payload", b"").unwrap();
 let last = sealed.ciphertext.len() - 1;
 sealed.ciphertext[last] ^= 0xFF;
 let err = responder
.open(sealed.seq, &sealed.ciphertext, b"")
.unwrap_err();
 assert!(matches!(err, SessionError::AuthFailure));
 }

 #[test]
 fn rotate_resets_tx_seq_and_old_key_still_opens_during_grace() {
 let (i_session, r_session) = established_pair();
 let mut initiator = Session::from_established(&i_session).unwrap();
 let mut responder = Session::from_established(&r_session).unwrap();

 let before_rotate = initiator.seal(b"before rotation", b"").unwrap();

 let new_tx = [0x77u8; 32];
 let new_rx = [0x88u8; 32];
 initiator.rotate(new_tx, new_rx).unwrap();
 responder.rotate(new_rx, new_tx).unwrap();

 assert_eq!(initiator.seal(b"after rotation", b"").unwrap().seq, 1);

 // A frame sealed under the pre-rotation key still opens during the
 // grace window even though the receiver has already rotated.
 let opened = responder
.open(before_rotate.seq, &before_rotate.ciphertext, b"")
.unwrap();
 assert_eq!(opened, b"before rotation");
 }

 #[test]
 fn ip_header_preservation_roundtrips_and_rewrites_total_length() {
 let (i_session, r_session) = established_pair();
 let initiator = Session::from_established(&i_session).unwrap();
 let mut responder = Session::from_established(&r_session).unwrap();

 // Minimal 20-byte IPv4 header (IHL=5) followed by a payload.
 let mut packet = vec![0x45, 0x00, 0x00, 0x00, 0, 0, 0, 0, 64, 6, 0, 0];
 packet.extend_from_slice(&[10, 0, 0, 1]);
 packet.extend_from_slice(&[10, 0, 0, 2]);
 packet.extend_from_slice(b"tcp segment payload");

 let sealed = initiator.seal_ip_packet(&packet).unwrap();
 let reassembled = responder
.open_ip_packet(sealed.seq, &sealed.ciphertext)
.unwrap();

 assert_eq!(&reassembled[20..], b"tcp segment payload");
 let total_len = u16::from_be_bytes([reassembled[2], reassembled[3]]);
 assert_eq!(total_len as usize, reassembled.len());
 assert_eq!(ipv4_checksum(&reassembled[..20]), 0);
 }
}
