//! Wire encoding for the relay's REGISTER message: `REGISTER(session_id,
//! role)` signed by the client's long-term ML-DSA-87 identity.
//!
//! Carried as the body of a [`HandshakeType::Register`] frame over the
//! reliable transport; everything after registration is an opaque byte pump.

use shadowmesh_crypto::signatures::{SigPublicKey, Signature};
use shadowmesh_protocol::error::FrameError;

/// Which end of a paired session a client is registering as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Role {
 /// The side that dialed first, by convention.
 A = 0x00,
 /// The other side.
 B = 0x01,
}

impl Role {
 /// The role a paired peer must present to match this one.
 #[must_use]
 pub fn opposite(self) -> Self {
 match self {
 Role::A => Role::B,
 Role::B => Role::A,
 }
 }
}

impl TryFrom<u8> for Role {
 type Error = FrameError;

 fn try_from(value: u8) -> Result<Self, Self::Error> {
 match value {
 0x00 => Ok(Role::A),
 0x01 => Ok(Role::B),
 other => Err(FrameError::UnknownType(other)),
 }
 }
}

/// A decoded, signature-verified registration request.
pub struct RegisterRequest {
 /// Session id pairing two endpoints.
 pub session_id: [u8; 32],
 /// Requested role.
 pub role: Role,
 /// Long-term identity of the registering client.
 pub identity: SigPublicKey,
}

/// Encode `REGISTER(session_id, role)` body: `session_id ‖ role ‖
/// identity(lp16) ‖ signature(lp16)`, where the signature covers
/// `session_id ‖ role`.
#[must_use]
pub fn encode(session_id: [u8; 32], role: Role, identity: &SigPublicKey, signature: &Signature) -> Vec<u8> {
 let mut out = Vec::with_capacity(32 + 1 + 2 + identity.as_bytes().len() + 2 + signature.as_bytes().len());
 out.extend_from_slice(&session_id);
 out.push(role as u8);
 push_lp16(&mut out, identity.as_bytes());
 push_lp16(&mut out, signature.as_bytes());
 out
}

/// The bytes a REGISTER's signature is computed and verified over.
#[must_use]
pub fn signed_message(session_id: [u8; 32], role: Role) -> Vec<u8> {
 let mut msg = Vec::with_capacity(33);
 msg.extend_from_slice(&session_id);
 msg.push(role as u8);
 msg
}

/// Decode and signature-verify a REGISTER body.
///
/// # Errors
/// Returns [`FrameError`] variants for malformed input. Signature
/// verification is the caller's responsibility to reject via
/// [`crate::error::RelayError::BadSignature`] since that isn't a framing
/// error.
pub fn decode(body: &[u8]) -> Result<(RegisterRequest, Signature), FrameError> {
 let mut pos = 0usize;
 let take = |pos: &mut usize, n: usize| -> Result<std::ops::Range<usize>, FrameError> {
 if *pos + n > body.len() {
 return Err(FrameError::TooShort {
 expected: *pos + n,
 actual: body.len(),
 });
 }
 let r = *pos..*pos + n;
 *pos += n;
 Ok(r)
 };

 let session_id: [u8; 32] = body[take(&mut pos, 32)?].try_into().unwrap();
 let role = Role::try_from(body[take(&mut pos, 1)?][0])?;

 let id_len_range = take(&mut pos, 2)?;
 let id_len = u16::from_be_bytes(body[id_len_range].try_into().unwrap()) as usize;
 let identity_bytes = &body[take(&mut pos, id_len)?];
 let identity = SigPublicKey::from_bytes(identity_bytes)
.map_err(|_| FrameError::LengthMismatch { declared: id_len, actual: identity_bytes.len() })?;

 let sig_len_range = take(&mut pos, 2)?;
 let sig_len = u16::from_be_bytes(body[sig_len_range].try_into().unwrap()) as usize;
 let sig_bytes = &body[take(&mut pos, sig_len)?];
 let signature = Signature::from_bytes(sig_bytes)
.map_err(|_| FrameError::LengthMismatch { declared: sig_len, actual: sig_bytes.len() })?;

 if pos != body.len() {
 return Err(FrameError::LengthMismatch {
 declared: pos,
 actual: body.len(),
 });
 }

 Ok((RegisterRequest { session_id, role, identity }, signature))
}

fn push_lp16(out: &mut Vec<u8>, field: &[u8]) {
 out.extend_from_slice(&(field.len() as u16).to_be_bytes());
 out.extend_from_slice(field);
}

#[cfg(test)]
mod tests {
 use super::*;
 use shadowmesh_crypto::signatures::{generate_identity, sign, verify};

 #[test]
 fn register_roundtrips_and_verifies() {
 let (pk, sk) = generate_identity();
 let session_id = [3u8; 32];
 let msg = signed_message(session_id, Role::A);
 let sig = sign(&sk, &msg).unwrap();
 let body = encode(session_id, Role::A, &pk, &sig);

 let (req, decoded_sig) = decode(&body).unwrap();
 assert_eq!(req.session_id, session_id);
 assert_eq!(req.role, Role::A);
 assert!(verify(&req.identity, &signed_message(req.session_id, req.role), &decoded_sig));
 }

 #[test]
 fn tampered_role_fails_signature_check() {
 let (pk, sk) = generate_identity();
 let session_id = [5u8; 32];
 let sig = sign(&sk, &signed_message(session_id, Role::A)).unwrap();
 let body = encode(session_id, Role::A, &pk, &sig);
 let (req, decoded_sig) = decode(&body).unwrap();
 // Verifying against the opposite role's message must fail.
 assert!(!verify(&req.identity, &signed_message(req.session_id, Role::B), &decoded_sig));
 }

 #[test]
 fn truncated_body_is_rejected() {
 let body = [0u8; 10];
 assert!(matches!(decode(&body), Err(FrameError::TooShort {.. })));
 }
}
