#![forbid(unsafe_code)]

use serde_json::{Map, Value};

use crate::frame::ProtocolError;

/// Inbound client event, validated once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
	/// Viewer heartbeat; a missing streamer is ignored by the server.
	Presence { streamer: Option<String> },
	Login(LoginRequest),
	Message { message: String },
	GetColor,
	Drawing { src: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
	pub username: String,
	pub streamer: String,
	pub color: Option<String>,
	pub key: Option<String>,
}

impl ClientMessage {
	pub const fn event_name(&self) -> &'static str {
		match self {
			ClientMessage::Presence { .. } => "presence",
			ClientMessage::Login(_) => "login",
			ClientMessage::Message { .. } => "message",
			ClientMessage::GetColor => "get color",
			ClientMessage::Drawing { .. } => "drawing",
		}
	}

	pub(crate) fn from_parts(event: &str, data: &Map<String, Value>) -> Result<Self, ProtocolError> {
		match event {
			"presence" => Ok(ClientMessage::Presence {
				streamer: optional_str(data, "streamer")?,
			}),
			"login" => Ok(ClientMessage::Login(LoginRequest {
				username: required_str(data, "username", "Username")?,
				streamer: required_str(data, "streamer", "Streamer")?,
				color: optional_str(data, "color")?,
				key: optional_str(data, "key")?,
			})),
			"message" => Ok(ClientMessage::Message {
				message: required_str(data, "message", "Message")?,
			}),
			"get color" => Ok(ClientMessage::GetColor),
			"drawing" => Ok(ClientMessage::Drawing {
				src: required_str(data, "src", "Image")?,
			}),
			other => Err(ProtocolError::UnknownEvent(other.to_string())),
		}
	}
}

fn required_str(data: &Map<String, Value>, field: &str, label: &'static str) -> Result<String, ProtocolError> {
	optional_str(data, field)?.ok_or(ProtocolError::MissingField(label))
}

fn optional_str(data: &Map<String, Value>, field: &str) -> Result<Option<String>, ProtocolError> {
	match data.get(field) {
		None | Some(Value::Null) => Ok(None),
		Some(Value::String(s)) => Ok(Some(s.clone())),
		Some(other) => Err(ProtocolError::Malformed(format!("field `{field}` must be a string, got {other}"))),
	}
}
