//! The message types that flow across the framed transport.

use bytes::Bytes;

/// An opaque, length-delimited byte payload exchanged with the child.
///
/// The supervisor never interprets the contents of a `Message` beyond framing it; the schema of
/// exchanged payloads is the caller's concern, with the one exception of [`SetCredentials`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
	bytes: Bytes,
}

impl Message {
	/// Wraps an owned byte buffer as a `Message`.
	pub fn new(bytes: impl Into<Bytes>) -> Self {
		Self { bytes: bytes.into() }
	}

	/// Borrows the payload.
	pub fn as_bytes(&self) -> &[u8] {
		&self.bytes
	}

	/// Consumes the message, returning the underlying bytes.
	pub fn into_bytes(self) -> Bytes {
		self.bytes
	}

	/// The encoded payload length, i.e. the value that would be written as the frame's length
	/// prefix.
	pub fn len(&self) -> usize {
		self.bytes.len()
	}

	/// Whether the payload is empty. A frame is never allowed to carry a zero-length payload
	/// on the wire (see [`crate::codec`]), but an in-memory `Message` under construction may
	/// transiently be empty.
	pub fn is_empty(&self) -> bool {
		self.bytes.is_empty()
	}
}

impl From<Vec<u8>> for Message {
	fn from(bytes: Vec<u8>) -> Self {
		Self::new(bytes)
	}
}

/// Credentials for either the primary data-plane or the metrics reporting path.
///
/// Sent to the child as a [`SetCredentials`] control message, and refreshed on
/// [`Configuration::credentials_refresh_delay`](crate::config::Configuration::credentials_refresh_delay).
#[derive(Clone)]
pub struct Credentials {
	pub access_key_id: String,
	pub secret_key: String,
	pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Credentials")
			.field("access_key_id", &self.access_key_id)
			.field("secret_key", &"<redacted>")
			.field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
			.finish()
	}
}

/// Sentinel identifying a `Message` as a `SetCredentials` control message rather than an opaque
/// user payload, mirroring the wire-level tag the child binary expects.
pub const SET_CREDENTIALS_SENTINEL: u16 = 0xC0DE;

/// The typed control message sent once per credential refresh cycle, for each of the primary and
/// metrics providers.
#[derive(Debug, Clone)]
pub struct SetCredentials {
	pub credentials: Credentials,
	pub for_metrics: bool,
}

impl SetCredentials {
	/// Serializes into a length-prefixable byte payload. The encoding is a minimal
	/// newline-delimited key=value scheme deliberately decoupled from any particular IDL: the
	/// wire schema of exchanged messages is explicitly out of scope for this crate (see spec
	/// §1); the child binary is the authority on how to parse it.
	pub fn to_message(&self) -> Message {
		let mut buf = Vec::new();
		buf.extend_from_slice(&SET_CREDENTIALS_SENTINEL.to_be_bytes());
		buf.push(self.for_metrics as u8);
		push_field(&mut buf, self.credentials.access_key_id.as_bytes());
		push_field(&mut buf, self.credentials.secret_key.as_bytes());
		match &self.credentials.session_token {
			Some(token) => {
				buf.push(1);
				push_field(&mut buf, token.as_bytes());
			}
			None => buf.push(0),
		}
		Message::new(buf)
	}
}

fn push_field(buf: &mut Vec<u8>, field: &[u8]) {
	buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
	buf.extend_from_slice(field);
}
