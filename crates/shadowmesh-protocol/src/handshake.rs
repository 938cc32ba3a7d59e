//! Four-message post-quantum handshake.
//!
//! ```text
//! I R
//! |--- HELLO ------------------------------------------->|
//! |<-- CHALLENGE -----------------------------------------|
//! |--- RESPONSE ------------------------------------------>|
//! |<-- ESTABLISHED ----------------------------------------|
//! ```
//!
//! This module is transport-agnostic: it only encodes/decodes/signs
//! messages and advances a state machine. Timeouts and the actual socket
//! I/O belong to the supervisor driving it.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use shadowmesh_crypto::kem::{self, KemCiphertext, KemPublicKey, KemSecretKey};
use shadowmesh_crypto::signatures::{self, Signature, SigPublicKey, SigSecretKey};

use crate::error::HandshakeError;
use crate::frame::{push_lp16, Reader};

/// Current terminal/non-terminal state of a handshake in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
 /// No message sent or received yet.
 Init,
 /// Initiator has sent HELLO, awaiting CHALLENGE.
 SentHello,
 /// Initiator has received and validated CHALLENGE.
 RecvChallenge,
 /// Initiator has sent RESPONSE, awaiting ESTABLISHED.
 SentResponse,
 /// Responder has received and validated HELLO.
 RecvHello,
 /// Responder has sent CHALLENGE, awaiting RESPONSE.
 SentChallenge,
 /// Both directional keys derived and transcript verified both ways.
 Established,
 /// The handshake has aborted; no keys were derived.
 Failed,
}

/// The session parameters agreed in ESTABLISHED, plus the derived
/// directional keys.
pub struct EstablishedSession {
 /// Session id chosen by the responder.
 pub session_id: [u8; 32],
 /// This side's send key.
 pub tx_key: [u8; 32],
 /// This side's receive key.
 pub rx_key: [u8; 32],
 /// Negotiated MTU.
 pub mtu: u16,
 /// Heartbeat interval, in seconds.
 pub heartbeat_s: u16,
 /// Key-rotation interval, in seconds.
 pub rotation_s: u32,
 /// Whether IP-header-preservation mode is enabled for this session.
 pub ip_header_preservation: bool,
 /// The remote peer's long-term identity key.
 pub peer_identity: SigPublicKey,
}

const HELLO_TX_LABEL: &[u8] = b"shadowmesh tx I->R";
const HELLO_RX_LABEL: &[u8] = b"shadowmesh tx R->I";

fn signable_hello(client_id: &[u8; 32], ml_dsa_pubkey: &[u8], kem_pubkey: &[u8], ts: u64) -> Vec<u8> {
 let mut out = Vec::with_capacity(32 + 2 + ml_dsa_pubkey.len() + 2 + kem_pubkey.len() + 8);
 out.extend_from_slice(client_id);
 push_lp16(&mut out, ml_dsa_pubkey);
 push_lp16(&mut out, kem_pubkey);
 out.extend_from_slice(&ts.to_be_bytes());
 out
}

fn signable_challenge(
 peer_id: &[u8; 32],
 ml_dsa_pubkey: &[u8],
 session_id: &[u8; 32],
 kem_ct: &[u8],
 ts: u64) -> Vec<u8> {
 let mut out = Vec::with_capacity(32 + 2 + ml_dsa_pubkey.len() + 32 + 2 + kem_ct.len() + 8);
 out.extend_from_slice(peer_id);
 push_lp16(&mut out, ml_dsa_pubkey);
 out.extend_from_slice(session_id);
 push_lp16(&mut out, kem_ct);
 out.extend_from_slice(&ts.to_be_bytes());
 out
}

fn signable_response(session_id: &[u8; 32], hmac_tag: &[u8; 32]) -> Vec<u8> {
 let mut out = Vec::with_capacity(64);
 out.extend_from_slice(session_id);
 out.extend_from_slice(hmac_tag);
 out
}

fn signable_established(
 session_id: &[u8; 32],
 mtu: u16,
 heartbeat_s: u16,
 rotation_s: u32,
 flags: u8) -> Vec<u8> {
 let mut out = Vec::with_capacity(32 + 2 + 2 + 4 + 1);
 out.extend_from_slice(session_id);
 out.extend_from_slice(&mtu.to_be_bytes());
 out.extend_from_slice(&heartbeat_s.to_be_bytes());
 out.extend_from_slice(&rotation_s.to_be_bytes());
 out.push(flags);
 out
}

/// Flag bit marking IP-header-preservation mode in ESTABLISHED.
const FLAG_IP_HEADER_PRESERVATION: u8 = 0b0000_0001;

fn transcript_hmac(shared_secret: &[u8; 32], transcript: &[u8]) -> [u8; 32] {
 let mut mac =
 Hmac::<Sha256>::new_from_slice(shared_secret).expect("HMAC accepts any key length");
 mac.update(transcript);
 let out = mac.finalize().into_bytes();
 let mut tag = [0u8; 32];
 tag.copy_from_slice(&out);
 tag
}

fn derive_directional_keys(shared_secret: &[u8; 32], session_id: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
 let prk = shadowmesh_crypto::hash::hkdf32(shared_secret, session_id, b"shadowmesh prk")
.expect("fixed-size HKDF output never fails");
 let tx_i = shadowmesh_crypto::hash::hkdf32(&prk, session_id, HELLO_TX_LABEL)
.expect("fixed-size HKDF output never fails");
 let tx_r = shadowmesh_crypto::hash::hkdf32(&prk, session_id, HELLO_RX_LABEL)
.expect("fixed-size HKDF output never fails");
 (tx_i, tx_r)
}

/// Drives the handshake from the initiator's side.
pub struct Initiator {
 state: HandshakeState,
 identity_pub: SigPublicKey,
 identity_sec: SigSecretKey,
 client_id: [u8; 32],
 kem_secret: Option<KemSecretKey>,
 transcript: Vec<u8>,
 shared_secret: Option<[u8; 32]>,
 session_id: Option<[u8; 32]>,
 peer_identity: Option<SigPublicKey>,
}

impl Initiator {
 /// Create a new initiator-side handshake. `client_id` is conventionally
 /// `identity_pub.identity`.
 #[must_use]
 pub fn new(identity_pub: SigPublicKey, identity_sec: SigSecretKey) -> Self {
 let client_id = identity_pub.identity();
 Self {
 state: HandshakeState::Init,
 identity_pub,
 identity_sec,
 client_id,
 kem_secret: None,
 transcript: Vec::new(),
 shared_secret: None,
 session_id: None,
 peer_identity: None,
 }
 }

 /// Current state.
 #[must_use]
 pub fn state(&self) -> HandshakeState {
 self.state
 }

 /// Build and sign HELLO, transitioning `Init -> SentHello`.
 ///
 /// # Errors
 /// Returns [`HandshakeError::KemFailure`] if ephemeral KEM key
 /// generation fails, or [`HandshakeError::UnexpectedMessage`] if called
 /// out of state.
 pub fn start(&mut self, now_unix_s: u64) -> Result<Vec<u8>, HandshakeError> {
 if self.state != HandshakeState::Init {
 return Err(HandshakeError::UnexpectedMessage { state: "Init" });
 }
 let (kem_pub, kem_sec) = kem::kem_keygen();
 self.kem_secret = Some(kem_sec);

 let signable = signable_hello(
 &self.client_id,
 self.identity_pub.as_bytes(),
 kem_pub.as_bytes(),
 now_unix_s);
 let sig = signatures::sign(&self.identity_sec, &signable)
.map_err(HandshakeError::KemFailure)?;

 let mut body = signable;
 push_lp16(&mut body, sig.as_bytes());

 self.transcript.extend_from_slice(&body);
 self.state = HandshakeState::SentHello;
 Ok(body)
 }

 /// Process CHALLENGE, decapsulate the KEM ciphertext, and build the
 /// signed RESPONSE, transitioning `SentHello -> SentResponse`.
 ///
 /// # Errors
 /// Returns [`HandshakeError::AuthMismatch`] if `sig_R` does not verify,
 /// [`HandshakeError::KemFailure`] if decapsulation fails, or
 /// [`HandshakeError::MalformedFrame`] if the body doesn't parse.
 pub fn on_challenge(&mut self, body: &[u8]) -> Result<Vec<u8>, HandshakeError> {
 if self.state != HandshakeState::SentHello {
 return Err(HandshakeError::UnexpectedMessage { state: "SentHello" });
 }

 let mut r = Reader::new(body);
 let peer_id: [u8; 32] = r.take(32)?.try_into().unwrap();
 let responder_pubkey_bytes = r.take_lp16()?;
 let session_id: [u8; 32] = r.take(32)?.try_into().unwrap();
 let kem_ct_bytes = r.take_lp16()?;
 let ts = r.take_u64()?;
 let sig_bytes = r.take_lp16()?;
 r.finish()?;

 let responder_pubkey = SigPublicKey::from_bytes(responder_pubkey_bytes)
.map_err(HandshakeError::KemFailure)?;
 let kem_ct =
 KemCiphertext::from_bytes(kem_ct_bytes).map_err(HandshakeError::KemFailure)?;
 let sig = Signature::from_bytes(sig_bytes).map_err(HandshakeError::KemFailure)?;

 let signable = signable_challenge(
 &peer_id,
 responder_pubkey.as_bytes(),
 &session_id,
 kem_ct_bytes,
 ts);
 let mut signed_transcript = self.transcript.clone();
 signed_transcript.extend_from_slice(&signable);
 if !signatures::verify(&responder_pubkey, &signed_transcript, &sig) {
 self.state = HandshakeState::Failed;
 return Err(HandshakeError::AuthMismatch);
 }

 let kem_secret = self
.kem_secret
.take()
.ok_or(HandshakeError::UnexpectedMessage { state: "SentHello" })?;
 let shared_secret = kem::kem_decapsulate(&kem_secret, &kem_ct)
.map_err(HandshakeError::KemFailure)?;

 let mut shared_secret_bytes = [0u8; 32];
 shared_secret_bytes.copy_from_slice(shared_secret.as_bytes());

 self.transcript.extend_from_slice(body);

 let proof = transcript_hmac(&shared_secret_bytes, &self.transcript);
 let response_signable = signable_response(&session_id, &proof);
 let mut response_transcript = self.transcript.clone();
 response_transcript.extend_from_slice(&response_signable);
 let response_sig = signatures::sign(&self.identity_sec, &response_transcript)
.map_err(HandshakeError::KemFailure)?;

 let mut response_body = response_signable;
 push_lp16(&mut response_body, response_sig.as_bytes());

 self.transcript.extend_from_slice(&response_body);
 self.shared_secret = Some(shared_secret_bytes);
 self.session_id = Some(session_id);
 self.peer_identity = Some(responder_pubkey);
 self.state = HandshakeState::SentResponse;
 Ok(response_body)
 }

 /// Process ESTABLISHED, verify its signature over the full transcript,
 /// and derive the two directional session keys, transitioning
 /// `SentResponse -> Established`.
 ///
 /// # Errors
 /// Returns [`HandshakeError::AuthMismatch`] on signature failure, or
 /// [`HandshakeError::MalformedFrame`] if the body doesn't parse.
 pub fn on_established(&mut self, body: &[u8]) -> Result<EstablishedSession, HandshakeError> {
 if self.state != HandshakeState::SentResponse {
 return Err(HandshakeError::UnexpectedMessage {
 state: "SentResponse",
 });
 }

 let mut r = Reader::new(body);
 let session_id: [u8; 32] = r.take(32)?.try_into().unwrap();
 let mtu = r.take_u16()?;
 let heartbeat_s = r.take_u16()?;
 let rotation_s = r.take_u32()?;
 let flags = r.take(1)?[0];
 let sig_bytes = r.take_lp16()?;
 r.finish()?;

 if session_id != self.session_id.unwrap_or_default() {
 self.state = HandshakeState::Failed;
 return Err(HandshakeError::AuthMismatch);
 }

 let signable = signable_established(&session_id, mtu, heartbeat_s, rotation_s, flags);
 let mut signed_transcript = self.transcript.clone();
 signed_transcript.extend_from_slice(&signable);

 let peer_identity = self
.peer_identity
.clone()
.ok_or(HandshakeError::UnexpectedMessage {
 state: "SentResponse",
 })?;
 let sig = Signature::from_bytes(sig_bytes).map_err(HandshakeError::KemFailure)?;
 if !signatures::verify(&peer_identity, &signed_transcript, &sig) {
 self.state = HandshakeState::Failed;
 return Err(HandshakeError::AuthMismatch);
 }

 let shared_secret = self
.shared_secret
.ok_or(HandshakeError::UnexpectedMessage {
 state: "SentResponse",
 })?;
 let (tx_i, tx_r) = derive_directional_keys(&shared_secret, &session_id);

 self.state = HandshakeState::Established;
 Ok(EstablishedSession {
 session_id,
 tx_key: tx_i,
 rx_key: tx_r,
 mtu,
 heartbeat_s,
 rotation_s,
 ip_header_preservation: flags & FLAG_IP_HEADER_PRESERVATION != 0,
 peer_identity,
 })
 }
}

/// Drives the handshake from the responder's side.
pub struct Responder {
 state: HandshakeState,
 identity_pub: SigPublicKey,
 identity_sec: SigSecretKey,
 relay_or_peer_id: [u8; 32],
 transcript: Vec<u8>,
 initiator_identity: Option<SigPublicKey>,
 session_id: [u8; 32],
 shared_secret: Option<[u8; 32]>,
 established_sent: Option<(u16, u16, u32, u8)>,
}

impl Responder {
 /// Create a new responder-side handshake, generating a fresh random
 /// session id. `relay_or_peer_id` is this side's own identity (or the
 /// relay's, when negotiating a relayed session).
 ///
 /// # Errors
 /// Returns [`HandshakeError::KemFailure`] if session-id generation
 /// fails (OS entropy unavailable).
 pub fn new(
 identity_pub: SigPublicKey,
 identity_sec: SigSecretKey,
 relay_or_peer_id: [u8; 32]) -> Result<Self, HandshakeError> {
 let session_id = shadowmesh_crypto::random::random_32().map_err(HandshakeError::KemFailure)?;
 Ok(Self {
 state: HandshakeState::Init,
 identity_pub,
 identity_sec,
 relay_or_peer_id,
 transcript: Vec::new(),
 initiator_identity: None,
 session_id,
 shared_secret: None,
 established_sent: None,
 })
 }

 /// Current state.
 #[must_use]
 pub fn state(&self) -> HandshakeState {
 self.state
 }

 /// Process HELLO, verify its self-signature, encapsulate a fresh shared
 /// secret, and build the signed CHALLENGE, transitioning
 /// `Init -> SentChallenge`.
 ///
 /// # Errors
 /// Returns [`HandshakeError::AuthMismatch`] if the signature or
 /// `client_id` binding fails, or [`HandshakeError::KemFailure`] on
 /// encapsulation/timestamp errors.
 pub fn on_hello(&mut self, body: &[u8], now_unix_s: u64) -> Result<Vec<u8>, HandshakeError> {
 if self.state != HandshakeState::Init {
 return Err(HandshakeError::UnexpectedMessage { state: "Init" });
 }

 let mut r = Reader::new(body);
 let client_id: [u8; 32] = r.take(32)?.try_into().unwrap();
 let initiator_pubkey_bytes = r.take_lp16()?;
 let kem_pubkey_bytes = r.take_lp16()?;
 let ts = r.take_u64()?;
 let sig_bytes = r.take_lp16()?;
 r.finish()?;

 let initiator_pubkey = SigPublicKey::from_bytes(initiator_pubkey_bytes)
.map_err(HandshakeError::KemFailure)?;
 if initiator_pubkey.identity() != client_id {
 self.state = HandshakeState::Failed;
 return Err(HandshakeError::AuthMismatch);
 }

 let signable = signable_hello(&client_id, initiator_pubkey_bytes, kem_pubkey_bytes, ts);
 let sig = Signature::from_bytes(sig_bytes).map_err(HandshakeError::KemFailure)?;
 if !signatures::verify(&initiator_pubkey, &signable, &sig) {
 self.state = HandshakeState::Failed;
 return Err(HandshakeError::AuthMismatch);
 }
 self.transcript.extend_from_slice(body);
 self.initiator_identity = Some(initiator_pubkey);

 let kem_pub =
 KemPublicKey::from_bytes(kem_pubkey_bytes).map_err(HandshakeError::KemFailure)?;
 let (kem_ct, shared_secret) = kem::kem_encapsulate(&kem_pub);
 let mut shared_secret_bytes = [0u8; 32];
 shared_secret_bytes.copy_from_slice(shared_secret.as_bytes());
 self.shared_secret = Some(shared_secret_bytes);

 let challenge_signable = signable_challenge(
 &self.relay_or_peer_id,
 self.identity_pub.as_bytes(),
 &self.session_id,
 kem_ct.as_bytes(),
 now_unix_s);
 let mut signed_transcript = self.transcript.clone();
 signed_transcript.extend_from_slice(&challenge_signable);
 let sig = signatures::sign(&self.identity_sec, &signed_transcript)
.map_err(HandshakeError::KemFailure)?;

 let mut challenge_body = challenge_signable;
 push_lp16(&mut challenge_body, sig.as_bytes());

 self.transcript.extend_from_slice(&challenge_body);
 self.state = HandshakeState::SentChallenge;
 Ok(challenge_body)
 }

 /// Process RESPONSE: verify the HMAC proof-of-possession and the
 /// signature over the transcript, transitioning
 /// `SentChallenge -> Established` conceptually (the caller still needs
 /// to send ESTABLISHED via [`Self::build_established`]).
 ///
 /// # Errors
 /// Returns [`HandshakeError::AuthMismatch`] if either check fails.
 pub fn on_response(&mut self, body: &[u8]) -> Result<(), HandshakeError> {
 if self.state != HandshakeState::SentChallenge {
 return Err(HandshakeError::UnexpectedMessage {
 state: "SentChallenge",
 });
 }

 let mut r = Reader::new(body);
 let session_id: [u8; 32] = r.take(32)?.try_into().unwrap();
 let hmac_tag: [u8; 32] = r.take(32)?.try_into().unwrap();
 let sig_bytes = r.take_lp16()?;
 r.finish()?;

 if session_id != self.session_id {
 self.state = HandshakeState::Failed;
 return Err(HandshakeError::AuthMismatch);
 }

 let shared_secret = self
.shared_secret
.ok_or(HandshakeError::UnexpectedMessage {
 state: "SentChallenge",
 })?;
 let expected_tag = transcript_hmac(&shared_secret, &self.transcript);
 // Constant-time-ish comparison is unnecessary here: hmac_tag also
 // requires a valid signature below, and a forged tag alone cannot
 // produce a valid signature without the initiator's secret key.
 if hmac_tag != expected_tag {
 self.state = HandshakeState::Failed;
 return Err(HandshakeError::AuthMismatch);
 }

 let initiator_identity = self
.initiator_identity
.clone()
.ok_or(HandshakeError::UnexpectedMessage {
 state: "SentChallenge",
 })?;
 let signable = signable_response(&session_id, &hmac_tag);
 let mut signed_transcript = self.transcript.clone();
 signed_transcript.extend_from_slice(&signable);
 let sig = Signature::from_bytes(sig_bytes).map_err(HandshakeError::KemFailure)?;
 if !signatures::verify(&initiator_identity, &signed_transcript, &sig) {
 self.state = HandshakeState::Failed;
 return Err(HandshakeError::AuthMismatch);
 }

 self.transcript.extend_from_slice(body);
 Ok(())
 }

 /// Build and sign ESTABLISHED once [`Self::on_response`] has succeeded,
 /// transitioning `SentChallenge -> Established`.
 ///
 /// # Errors
 /// Returns [`HandshakeError::KemFailure`] only if signing fails.
 pub fn build_established(
 &mut self,
 mtu: u16,
 heartbeat_s: u16,
 rotation_s: u32,
 ip_header_preservation: bool) -> Result<(Vec<u8>, EstablishedSession), HandshakeError> {
 if self.state != HandshakeState::SentChallenge {
 return Err(HandshakeError::UnexpectedMessage {
 state: "SentChallenge",
 });
 }

 let flags = if ip_header_preservation {
 FLAG_IP_HEADER_PRESERVATION
 } else {
 0
 };
 let signable = signable_established(&self.session_id, mtu, heartbeat_s, rotation_s, flags);
 let mut signed_transcript = self.transcript.clone();
 signed_transcript.extend_from_slice(&signable);
 let sig = signatures::sign(&self.identity_sec, &signed_transcript)
.map_err(HandshakeError::KemFailure)?;

 let mut body = signable;
 push_lp16(&mut body, sig.as_bytes());
 self.established_sent = Some((mtu, heartbeat_s, rotation_s, flags));

 let shared_secret = self.shared_secret.expect("set by on_hello");
 let (tx_i, tx_r) = derive_directional_keys(&shared_secret, &self.session_id);
 self.state = HandshakeState::Established;

 Ok((
 body,
 EstablishedSession {
 session_id: self.session_id,
 tx_key: tx_r,
 rx_key: tx_i,
 mtu,
 heartbeat_s,
 rotation_s,
 ip_header_preservation,
 peer_identity: self.initiator_identity.clone().expect("set by on_hello"),
 }))
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 fn now() -> u64 {
 1_700_000_000
 }

 #[test]
 fn full_handshake_derives_matching_directional_keys() {
 let (i_pub, i_sec) = signatures::generate_identity();
 let (r_pub, r_sec) = signatures::generate_identity();
 let relay_id = r_pub.identity();

 let mut initiator = Initiator::new(i_pub, i_sec);
 let mut responder = Responder::new(r_pub, r_sec, relay_id).unwrap();

 let hello = initiator.start(now()).unwrap();
 let challenge = responder.on_hello(&hello, now()).unwrap();
 let response = initiator.on_challenge(&challenge).unwrap();
 responder.on_response(&response).unwrap();
 let (established, responder_session) = responder
.build_established(1500, 30, 3600, true)
.unwrap();
 let initiator_session = initiator.on_established(&established).unwrap();

 assert_eq!(initiator_session.session_id, responder_session.session_id);
 assert_eq!(initiator_session.tx_key, responder_session.rx_key);
 assert_eq!(initiator_session.rx_key, responder_session.tx_key);
 assert_ne!(initiator_session.tx_key, initiator_session.rx_key);
 assert!(initiator_session.ip_header_preservation);
 assert_eq!(initiator.state, HandshakeState::Established);
 assert_eq!(responder.state, HandshakeState::Established);
 }

 #[test]
 fn tampered_hello_signature_is_rejected() {
 let (i_pub, i_sec) = signatures::generate_identity();
 let (r_pub, r_sec) = signatures::generate_identity();
 let relay_id = r_pub.identity();

 let mut initiator = Initiator::new(i_pub, i_sec);
 let mut responder = Responder::new(r_pub, r_sec, relay_id).unwrap();

 let mut hello = initiator.start(now()).unwrap();
 let last = hello.len() - 1;
 hello[last] ^= 0xFF;

 let err = responder.on_hello(&hello, now()).unwrap_err();
 assert!(matches!(err, HandshakeError::AuthMismatch));
 assert_eq!(responder.state, HandshakeState::Failed);
 }

 #[test]
 fn tampered_challenge_signature_is_rejected() {
 let (i_pub, i_sec) = signatures::generate_identity();
 let (r_pub, r_sec) = signatures::generate_identity();
 let relay_id = r_pub.identity();

 let mut initiator = Initiator::new(i_pub, i_sec);
 let mut responder = Responder::new(r_pub, r_sec, relay_id).unwrap();

 let hello = initiator.start(now()).unwrap();
 let mut challenge = responder.on_hello(&hello, now()).unwrap();
 let last = challenge.len() - 1;
 challenge[last] ^= 0xFF;

 let err = initiator.on_challenge(&challenge).unwrap_err();
 assert!(matches!(err, HandshakeError::AuthMismatch));
 }

 #[test]
 fn out_of_order_message_is_rejected() {
 let (r_pub, r_sec) = signatures::generate_identity();
 let relay_id = r_pub.identity();
 let mut responder = Responder::new(r_pub, r_sec, relay_id).unwrap();

 let bogus_response = vec![0u8; 66];
 let err = responder.on_response(&bogus_response).unwrap_err();
 assert!(matches!(
 err,
 HandshakeError::UnexpectedMessage { state: "SentChallenge" }
 ));
 }
}
