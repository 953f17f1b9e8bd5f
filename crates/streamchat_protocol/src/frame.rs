#![forbid(unsafe_code)]

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::client::ClientMessage;
use crate::server::ServerEvent;

/// Default maximum inbound text frame size (drawings are the largest payload).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024; // 256 KiB

#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge { len: usize, max: usize },

	#[error("malformed frame: {0}")]
	Malformed(String),

	/// Display text is the reply sent back to the client.
	#[error("{0} missing from JSON?")]
	MissingField(&'static str),

	#[error("unknown event: {0}")]
	UnknownEvent(String),

	#[error("json encode error: {0}")]
	Encode(#[source] serde_json::Error),
}

#[derive(Deserialize)]
struct RawFrame {
	event: String,
	#[serde(default)]
	data: Option<Map<String, Value>>,
}

/// Decode and validate one inbound text frame.
pub fn decode_client_frame(text: &str, max_frame_size: usize) -> Result<ClientMessage, ProtocolError> {
	if text.len() > max_frame_size {
		return Err(ProtocolError::FrameTooLarge {
			len: text.len(),
			max: max_frame_size,
		});
	}

	let raw: RawFrame = serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
	let data = raw.data.unwrap_or_default();
	ClientMessage::from_parts(raw.event.trim(), &data)
}

/// Encode an outbound event as a JSON text frame.
pub fn encode_server_event(event: &ServerEvent) -> Result<String, ProtocolError> {
	serde_json::to_string(event).map_err(ProtocolError::Encode)
}
