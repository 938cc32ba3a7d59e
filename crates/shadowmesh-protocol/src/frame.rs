//! Wire encoding/decoding for handshake messages and data frames.
//!
//! All integers are big-endian; variable-length fields are length-prefixed
//! with `u16` unless noted otherwise. Every `decode_*` function rejects a
//! declared length that does not match the bytes actually present, and
//! bounds total message size at [`MAX_MESSAGE_SIZE`].

use crate::error::FrameError;

/// Maximum size of any single handshake or control message.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Size of the datagram frame header.
pub const DATAGRAM_HEADER_SIZE: usize = 19;

/// Type byte for a handshake/control message on the reliable channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HandshakeType {
 /// Initiator's opening message.
 Hello = 0x10,
 /// Responder's KEM-encapsulating reply.
 Challenge = 0x11,
 /// Initiator's proof-of-possession reply.
 Response = 0x12,
 /// Responder's session parameters, handshake complete.
 Established = 0x13,
 /// Graceful session teardown.
 Close = 0x14,
 /// Key-rotation request carrying a fresh KEM public key.
 RotateReq = 0x15,
 /// Key-rotation acknowledgement carrying the KEM ciphertext.
 RotateAck = 0x16,
 /// Relay registration.
 Register = 0x17,
}

impl TryFrom<u8> for HandshakeType {
 type Error = FrameError;

 fn try_from(value: u8) -> Result<Self, Self::Error> {
 match value {
 0x10 => Ok(Self::Hello),
 0x11 => Ok(Self::Challenge),
 0x12 => Ok(Self::Response),
 0x13 => Ok(Self::Established),
 0x14 => Ok(Self::Close),
 0x15 => Ok(Self::RotateReq),
 0x16 => Ok(Self::RotateAck),
 0x17 => Ok(Self::Register),
 other => Err(FrameError::UnknownType(other)),
 }
 }
}

/// Type byte of a datagram frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DatagramType {
 /// Encrypted application data.
 Data = 0x00,
 /// RTT probe request, carries the sender's timestamp unencrypted.
 EchoReq = 0x01,
 /// RTT probe reply, echoes the probed timestamp back.
 EchoReply = 0x02,
}

impl TryFrom<u8> for DatagramType {
 type Error = FrameError;

 fn try_from(value: u8) -> Result<Self, Self::Error> {
 match value {
 0x00 => Ok(Self::Data),
 0x01 => Ok(Self::EchoReq),
 0x02 => Ok(Self::EchoReply),
 other => Err(FrameError::UnknownType(other)),
 }
 }
}

/// A reliable-channel frame: `[type u8 ‖ length u16 ‖ body]`.
///
/// Encode a handshake/control body into a framed message ready for the
/// reliable transport.
///
/// # Errors
/// Returns [`FrameError::TooLarge`] if `body` exceeds [`MAX_MESSAGE_SIZE`].
pub fn encode_handshake_frame(kind: HandshakeType, body: &[u8]) -> Result<Vec<u8>, FrameError> {
 if body.len() > MAX_MESSAGE_SIZE {
 return Err(FrameError::TooLarge(body.len()));
 }
 let mut out = Vec::with_capacity(3 + body.len());
 out.push(kind as u8);
 out.extend_from_slice(&(body.len() as u16).to_be_bytes());
 out.extend_from_slice(body);
 Ok(out)
}

/// Decode a single reliable-channel frame from the front of `data`.
///
/// Returns the frame type, the body slice, and the total number of bytes
/// consumed (so callers reading a byte stream can advance past it).
///
/// # Errors
/// Returns [`FrameError::TooShort`] if `data` doesn't contain a full header,
/// [`FrameError::LengthMismatch`] if the declared body length exceeds what's
/// available, and [`FrameError::UnknownType`] for an unrecognized type byte.
pub fn decode_handshake_frame(data: &[u8]) -> Result<(HandshakeType, &[u8], usize), FrameError> {
 if data.len() < 3 {
 return Err(FrameError::TooShort {
 expected: 3,
 actual: data.len(),
 });
 }
 let kind = HandshakeType::try_from(data[0])?;
 let length = u16::from_be_bytes([data[1], data[2]]) as usize;
 if length > MAX_MESSAGE_SIZE {
 return Err(FrameError::TooLarge(length));
 }
 if 3 + length > data.len() {
 return Err(FrameError::LengthMismatch {
 declared: length,
 actual: data.len() - 3,
 });
 }
 Ok((kind, &data[3..3 + length], 3 + length))
}

/// A parsed datagram frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
 /// Monotonic outbound sequence number.
 pub seq: u64,
 /// Frame type.
 pub kind: DatagramType,
 /// Sender timestamp, used unmodified for ECHO_REQ/ECHO_REPLY.
 pub timestamp: u64,
 /// Payload byte count.
 pub size: u16,
}

impl DatagramHeader {
 /// Encode the header, independent of its payload.
 #[must_use]
 pub fn encode(&self) -> [u8; DATAGRAM_HEADER_SIZE] {
 let mut out = [0u8; DATAGRAM_HEADER_SIZE];
 out[0..8].copy_from_slice(&self.seq.to_be_bytes());
 out[8] = self.kind as u8;
 out[9..17].copy_from_slice(&self.timestamp.to_be_bytes());
 out[17..19].copy_from_slice(&self.size.to_be_bytes());
 out
 }

 /// Decode the header from the front of `data`, without validating that
 /// the payload is actually present (callers check that against the
 /// datagram's real length, since UDP frames carry no further framing).
 ///
 /// # Errors
 /// Returns [`FrameError::TooShort`] if `data` is shorter than
 /// [`DATAGRAM_HEADER_SIZE`], or [`FrameError::UnknownType`] for an
 /// unrecognized type byte.
 pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
 if data.len() < DATAGRAM_HEADER_SIZE {
 return Err(FrameError::TooShort {
 expected: DATAGRAM_HEADER_SIZE,
 actual: data.len(),
 });
 }
 let seq = u64::from_be_bytes(data[0..8].try_into().unwrap());
 let kind = DatagramType::try_from(data[8])?;
 let timestamp = u64::from_be_bytes(data[9..17].try_into().unwrap());
 let size = u16::from_be_bytes(data[17..19].try_into().unwrap());
 Ok(Self {
 seq,
 kind,
 timestamp,
 size,
 })
 }
}

/// Encode a full datagram frame: header followed by `payload`.
///
/// # Errors
/// Returns [`FrameError::TooLarge`] if `payload` does not fit in a `u16`
/// size field.
pub fn encode_datagram(
 seq: u64,
 kind: DatagramType,
 timestamp: u64,
 payload: &[u8]) -> Result<Vec<u8>, FrameError> {
 if payload.len() > u16::MAX as usize {
 return Err(FrameError::TooLarge(payload.len()));
 }
 let header = DatagramHeader {
 seq,
 kind,
 timestamp,
 size: payload.len() as u16,
 };
 let mut out = Vec::with_capacity(DATAGRAM_HEADER_SIZE + payload.len());
 out.extend_from_slice(&header.encode());
 out.extend_from_slice(payload);
 Ok(out)
}

/// Decode a full datagram frame, validating that `size` matches the bytes
/// actually present after the header.
///
/// # Errors
/// See [`DatagramHeader::decode`]; additionally returns
/// [`FrameError::LengthMismatch`] if `size` disagrees with the remaining
/// buffer length.
pub fn decode_datagram(data: &[u8]) -> Result<(DatagramHeader, &[u8]), FrameError> {
 let header = DatagramHeader::decode(data)?;
 let payload = &data[DATAGRAM_HEADER_SIZE..];
 if payload.len() != header.size as usize {
 return Err(FrameError::LengthMismatch {
 declared: header.size as usize,
 actual: payload.len(),
 });
 }
 Ok((header, payload))
}

/// A small forward-only cursor over a byte slice, used by the handshake
/// body encoders/decoders below for sequential fixed/length-prefixed reads.
pub(crate) struct Reader<'a> {
 data: &'a [u8],
 pos: usize,
}

impl<'a> Reader<'a> {
 pub(crate) fn new(data: &'a [u8]) -> Self {
 Self { data, pos: 0 }
 }

 pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
 if self.pos + n > self.data.len() {
 return Err(FrameError::TooShort {
 expected: self.pos + n,
 actual: self.data.len(),
 });
 }
 let slice = &self.data[self.pos..self.pos + n];
 self.pos += n;
 Ok(slice)
 }

 pub(crate) fn take_u16(&mut self) -> Result<u16, FrameError> {
 Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
 }

 pub(crate) fn take_u32(&mut self) -> Result<u32, FrameError> {
 Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
 }

 pub(crate) fn take_u64(&mut self) -> Result<u64, FrameError> {
 Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
 }

 /// Read a `u16`-length-prefixed variable field.
 pub(crate) fn take_lp16(&mut self) -> Result<&'a [u8], FrameError> {
 let len = self.take_u16()? as usize;
 self.take(len)
 }

 pub(crate) fn finish(&self) -> Result<(), FrameError> {
 if self.pos != self.data.len() {
 return Err(FrameError::LengthMismatch {
 declared: self.pos,
 actual: self.data.len(),
 });
 }
 Ok(())
 }
}

pub(crate) fn push_lp16(out: &mut Vec<u8>, field: &[u8]) {
 out.extend_from_slice(&(field.len() as u16).to_be_bytes());
 out.extend_from_slice(field);
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn handshake_frame_roundtrip() {
 let body = b"hello body bytes";
 let framed = encode_handshake_frame(HandshakeType::Hello, body).unwrap();
 let (kind, decoded_body, consumed) = decode_handshake_frame(&framed).unwrap();
 assert_eq!(kind, HandshakeType::Hello);
 assert_eq!(decoded_body, body);
 assert_eq!(consumed, framed.len());
 }

 #[test]
 fn handshake_frame_rejects_length_mismatch() {
 let mut framed = encode_handshake_frame(HandshakeType::Close, b"x").unwrap();
 framed[1] = 0xFF;
 framed[2] = 0xFF;
 assert!(matches!(
 decode_handshake_frame(&framed),
 Err(FrameError::LengthMismatch {.. })
 ));
 }

 #[test]
 fn handshake_frame_rejects_unknown_type() {
 let mut framed = encode_handshake_frame(HandshakeType::Close, b"").unwrap();
 framed[0] = 0x99;
 assert!(matches!(
 decode_handshake_frame(&framed),
 Err(FrameError::UnknownType(0x99))
 ));
 }

 #[test]
 fn datagram_header_roundtrip() {
 let frame = encode_datagram(7, DatagramType::Data, 123_456, b"payload bytes").unwrap();
 let (header, payload) = decode_datagram(&frame).unwrap();
 assert_eq!(header.seq, 7);
 assert_eq!(header.kind, DatagramType::Data);
 assert_eq!(header.timestamp, 123_456);
 assert_eq!(payload, b"payload bytes");
 }

 #[test]
 fn datagram_header_is_exactly_19_bytes() {
 let frame = encode_datagram(0, DatagramType::EchoReq, 0, b"").unwrap();
 assert_eq!(&frame.len(), &DATAGRAM_HEADER_SIZE);
 }

 #[test]
 fn datagram_rejects_size_mismatch() {
 let mut frame = encode_datagram(0, DatagramType::Data, 0, b"abc").unwrap();
 frame[17] = 0;
 frame[18] = 99;
 assert!(matches!(
 decode_datagram(&frame),
 Err(FrameError::LengthMismatch {.. })
 ));
 }

 #[test]
 fn handshake_message_over_bound_is_rejected_before_crypto_work() {
 let oversized = vec![0u8; MAX_MESSAGE_SIZE + 1];
 assert!(matches!(
 encode_handshake_frame(HandshakeType::Hello, &oversized),
 Err(FrameError::TooLarge(_))
 ));
 }

 mod proptests {
 use super::*;
 use proptest::prelude::*;

 proptest! {
 #[test]
 fn prop_decode_handshake_frame_never_panics(data in prop::collection::vec(any::<u8>(), 0..4096)) {
 let _ = decode_handshake_frame(&data);
 }

 #[test]
 fn prop_decode_datagram_never_panics(data in prop::collection::vec(any::<u8>(), 0..4096)) {
 let _ = decode_datagram(&data);
 }

 #[test]
 fn prop_datagram_roundtrip_preserves_fields(
 seq in any::<u64>(),
 timestamp in any::<u64>(),
 payload in prop::collection::vec(any::<u8>(), 0..1024)) {
 let frame = encode_datagram(seq, DatagramType::Data, timestamp, &payload).unwrap();
 let (header, decoded_payload) = decode_datagram(&frame).unwrap();
 prop_assert_eq!(header.seq, seq);
 prop_assert_eq!(header.timestamp, timestamp);
 prop_assert_eq!(decoded_payload, payload.as_slice());
 }
 }
 }
}
