//! Key-rotation exchange: `ROTATE_REQ`/`ROTATE_ACK`.
//!
//! Runs over the reliable channel inside an already-[`Established`]
//! session, so the two wire bodies carry nothing but raw KEM key material;
//! the exchange is itself authenticated by virtue of riding the existing
//! session's framing, not by a fresh signature. Both directional keys are
//! re-derived with the `"shadowmesh rotate tx …"` HKDF labels and installed
//! into the live [`Session`] via [`Session::rotate`] in lock-step on both
//! ends.
//!
//! [`Established`]: crate::handshake::HandshakeState::Established

use shadowmesh_crypto::kem::{self, KemCiphertext, KemPublicKey, KemSecretKey};

use crate::error::HandshakeError;
use crate::session::Session;

const ROTATE_TX_LABEL: &[u8] = b"shadowmesh rotate tx I->R";
const ROTATE_RX_LABEL: &[u8] = b"shadowmesh rotate tx R->I";

fn derive_rotation_keys(shared_secret: &[u8; 32], salt: &[u8]) -> ([u8; 32], [u8; 32]) {
 let prk = shadowmesh_crypto::hash::hkdf32(shared_secret, salt, b"shadowmesh rotate prk")
.expect("fixed-size HKDF output never fails");
 let tx_i = shadowmesh_crypto::hash::hkdf32(&prk, salt, ROTATE_TX_LABEL)
.expect("fixed-size HKDF output never fails");
 let tx_r = shadowmesh_crypto::hash::hkdf32(&prk, salt, ROTATE_RX_LABEL)
.expect("fixed-size HKDF output never fails");
 (tx_i, tx_r)
}

/// Drives rotation from the side that owned the `Initiator` role during the
/// original handshake.
pub struct RotationInitiator {
 kem_secret: Option<KemSecretKey>,
}

impl RotationInitiator {
 /// Generate a fresh ephemeral KEM keypair and return the `ROTATE_REQ`
 /// body (the raw public key bytes).
 #[must_use]
 pub fn start() -> (Vec<u8>, Self) {
 let (kem_pub, kem_sec) = kem::kem_keygen();
 (
 kem_pub.as_bytes().to_vec(),
 Self {
 kem_secret: Some(kem_sec),
 })
 }

 /// Process `ROTATE_ACK`, decapsulate the fresh shared secret, and
 /// install the new directional keys into `session` via
 /// [`Session::rotate`].
 ///
 /// # Errors
 /// Returns [`HandshakeError::KemFailure`] if the ciphertext doesn't
 /// decode or decapsulation fails.
 pub fn on_ack(self, ack_body: &[u8], session: &mut Session) -> Result<(), HandshakeError> {
 let kem_secret = self
.kem_secret
.ok_or(HandshakeError::UnexpectedMessage { state: "RotateReq" })?;
 let ciphertext = KemCiphertext::from_bytes(ack_body).map_err(HandshakeError::KemFailure)?;
 let shared_secret =
 kem::kem_decapsulate(&kem_secret, &ciphertext).map_err(HandshakeError::KemFailure)?;

 let mut shared_secret_bytes = [0u8; 32];
 shared_secret_bytes.copy_from_slice(shared_secret.as_bytes());
 let salt = session.rotation_salt();
 let (tx_i, tx_r) = derive_rotation_keys(&shared_secret_bytes, &salt);

 session
.rotate(tx_i, tx_r)
.map_err(|_| HandshakeError::KemFailure(shadowmesh_crypto::CryptoError::RngFailure))
 }
}

/// Drives rotation from the side that owned the `Responder` role during the
/// original handshake.
pub struct RotationResponder;

impl RotationResponder {
 /// Process `ROTATE_REQ`, encapsulate a fresh shared secret to the
 /// initiator's new ephemeral key, install the new directional keys, and
 /// return the `ROTATE_ACK` body (the raw ciphertext bytes).
 ///
 /// # Errors
 /// Returns [`HandshakeError::KemFailure`] if the public key doesn't
 /// decode or rotation fails.
 pub fn on_req(req_body: &[u8], session: &mut Session) -> Result<Vec<u8>, HandshakeError> {
 let kem_pub = KemPublicKey::from_bytes(req_body).map_err(HandshakeError::KemFailure)?;
 let (ciphertext, shared_secret) = kem::kem_encapsulate(&kem_pub);

 let mut shared_secret_bytes = [0u8; 32];
 shared_secret_bytes.copy_from_slice(shared_secret.as_bytes());
 let salt = session.rotation_salt();
 let (tx_i, tx_r) = derive_rotation_keys(&shared_secret_bytes, &salt);

 session
.rotate(tx_r, tx_i)
.map_err(|_| HandshakeError::KemFailure(shadowmesh_crypto::CryptoError::RngFailure))?;
 Ok(ciphertext.as_bytes().to_vec())
 }
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::handshake::{Initiator, Responder};
 use shadowmesh_crypto::signatures;

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

 #[test]
 fn rotation_derives_matching_directional_keys_and_resets_tx_seq() {
 let (mut initiator, mut responder) = established_pair();

 let (req_body, rotation_initiator) = RotationInitiator::start();
 let ack_body = RotationResponder::on_req(&req_body, &mut responder).unwrap();
 rotation_initiator.on_ack(&ack_body, &mut initiator).unwrap();

 let sealed = initiator.seal(b"post-rotation frame", b"").unwrap();
 assert_eq!(sealed.seq, 1);
 let opened = responder.open(sealed.seq, &sealed.ciphertext, b"").unwrap();
 assert_eq!(opened, b"post-rotation frame");
 }
}
