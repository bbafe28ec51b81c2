//! Big-endian length-prefixed framing over an arbitrary byte stream.
//!
//! ```text
//! Frame := LengthBE32 Payload
//! LengthBE32 := uint32, big-endian, 1 <= n <= capacity
//! Payload    := opaque bytes, len = LengthBE32
//! ```
//!
//! Both [`encode`] and [`FrameReader`] are synchronous and blocking: they are intended to run
//! inside a `tokio::task::spawn_blocking` closure, since the channels they operate over are FIFOs
//! with no portable non-blocking story (see crate-level docs).

use std::io::{self, Read, Write};

use bytes::BytesMut;

use crate::error::SupervisorError;
use crate::message::Message;

/// The largest payload the wire format allows, matching the receive buffer capacity.
pub const MAX_FRAME_SIZE: u32 = 8 * 1024 * 1024;

/// Writes one frame: a 4-byte big-endian length prefix followed by `msg`'s bytes, then flushes.
///
/// Short writes are looped until `write` reports the full frame was accepted, matching the
/// "short reads loop until satisfied" behaviour the read side also exhibits.
pub fn encode<W: Write>(out: &mut W, msg: &Message) -> io::Result<()> {
	let payload = msg.as_bytes();
	let len = u32::try_from(payload.len()).map_err(|_| {
		io::Error::new(io::ErrorKind::InvalidInput, "message too large to encode")
	})?;
	write_all_looping(out, &len.to_be_bytes())?;
	write_all_looping(out, payload)?;
	out.flush()
}

fn write_all_looping<W: Write>(out: &mut W, mut buf: &[u8]) -> io::Result<()> {
	while !buf.is_empty() {
		match out.write(buf) {
			Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
			Ok(n) => buf = &buf[n..],
			Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
			Err(e) => return Err(e),
		}
	}
	Ok(())
}

/// A reusable scratch buffer for reading frames off a stream.
///
/// The buffer is reset (position and limit cleared) before each frame; every successfully
/// decoded frame is copied out into an owned [`Message`] before `read_frame` returns, so the
/// scratch storage never aliases a `Message` the caller might hold onto across calls — the
/// aliasing hazard named as an open question in the original design is closed by construction.
pub struct FrameReader {
	scratch: BytesMut,
	capacity: u32,
}

impl FrameReader {
	/// Creates a reader with the given maximum frame size.
	pub fn with_capacity(capacity: u32) -> Self {
		Self { scratch: BytesMut::with_capacity(capacity as usize), capacity }
	}

	/// Reads exactly one frame, validating `0 < len <= capacity`.
	///
	/// A length outside that range is a protocol violation and returned as
	/// [`SupervisorError::InvalidMessageSize`]; a stream that ends before a full frame is read
	/// is returned as [`SupervisorError::UnexpectedEof`]. In neither case is a partial `Message`
	/// ever produced.
	pub fn read_frame<R: Read>(&mut self, input: &mut R) -> Result<Message, SupervisorError> {
		let mut header = [0u8; 4];
		read_exact_looping(input, &mut header)?;
		let len = u32::from_be_bytes(header);
		if len == 0 || len > self.capacity {
			return Err(SupervisorError::InvalidMessageSize { len, capacity: self.capacity });
		}

		self.scratch.clear();
		self.scratch.resize(len as usize, 0);
		read_exact_looping(input, &mut self.scratch)?;

		Ok(Message::new(self.scratch.split().freeze()))
	}
}

fn read_exact_looping<R: Read>(input: &mut R, mut buf: &mut [u8]) -> Result<(), SupervisorError> {
	while !buf.is_empty() {
		match input.read(buf) {
			Ok(0) => return Err(SupervisorError::UnexpectedEof),
			Ok(n) => buf = &mut buf[n..],
			Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
			Err(e) => return Err(SupervisorError::ChannelIo(e)),
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[test]
	fn round_trips_a_message() {
		let msg = Message::new(b"hello kinesis".to_vec());
		let mut buf = Vec::new();
		encode(&mut buf, &msg).unwrap();

		let mut reader = FrameReader::with_capacity(MAX_FRAME_SIZE);
		let decoded = reader.read_frame(&mut Cursor::new(buf)).unwrap();
		assert_eq!(decoded, msg);
	}

	#[test]
	fn rejects_zero_length_frame() {
		let mut reader = FrameReader::with_capacity(MAX_FRAME_SIZE);
		let mut buf = Cursor::new(0u32.to_be_bytes().to_vec());
		let err = reader.read_frame(&mut buf).unwrap_err();
		assert!(matches!(err, SupervisorError::InvalidMessageSize { len: 0, .. }));
	}

	#[test]
	fn rejects_oversize_frame() {
		let mut reader = FrameReader::with_capacity(MAX_FRAME_SIZE);
		let oversize = MAX_FRAME_SIZE + 1;
		let mut buf = Cursor::new(oversize.to_be_bytes().to_vec());
		let err = reader.read_frame(&mut buf).unwrap_err();
		assert!(matches!(
			err,
			SupervisorError::InvalidMessageSize { len, .. } if len == oversize
		));
	}

	#[test]
	fn premature_eof_does_not_yield_a_partial_message() {
		let mut reader = FrameReader::with_capacity(MAX_FRAME_SIZE);
		// Announce 4 bytes, but only supply 3.
		let mut bytes = 4u32.to_be_bytes().to_vec();
		bytes.extend_from_slice(b"abc");
		let mut buf = Cursor::new(bytes);
		let err = reader.read_frame(&mut buf).unwrap_err();
		assert!(matches!(err, SupervisorError::UnexpectedEof));
	}

	#[test]
	fn reused_buffer_does_not_alias_across_frames() {
		let mut reader = FrameReader::with_capacity(MAX_FRAME_SIZE);
		let mut wire = Vec::new();
		encode(&mut wire, &Message::new(b"first".to_vec())).unwrap();
		encode(&mut wire, &Message::new(b"second".to_vec())).unwrap();
		let mut cursor = Cursor::new(wire);

		let first = reader.read_frame(&mut cursor).unwrap();
		let second = reader.read_frame(&mut cursor).unwrap();
		assert_eq!(first.as_bytes(), b"first");
		assert_eq!(second.as_bytes(), b"second");
	}
}
