#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use streamchat_domain::Role;

/// One row of a room roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
	pub username: String,
	#[serde(rename = "type")]
	pub kind: Role,
	/// `#rrggbb`
	pub color: String,
}

/// `connected` / `disconnected` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipChange {
	pub username: String,
	#[serde(rename = "type")]
	pub kind: Role,
	pub color: String,
	pub users: Vec<RosterEntry>,
}

/// `message received` / `action received` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
	pub username: String,
	#[serde(rename = "type")]
	pub kind: Role,
	pub color: String,
	pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameNotice {
	pub newname: String,
	pub oldname: String,
	#[serde(rename = "type")]
	pub kind: Role,
	pub color: String,
	pub users: Vec<RosterEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drawing {
	pub username: String,
	#[serde(rename = "type")]
	pub kind: Role,
	pub color: String,
	pub src: String,
}

/// Outbound event. Serializes as `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
	#[serde(rename = "error")]
	Error { msg: String },
	#[serde(rename = "warning")]
	Warning { msg: String },
	#[serde(rename = "server")]
	Server { msg: String },
	#[serde(rename = "login success")]
	LoginSuccess { username: String },
	#[serde(rename = "login key required")]
	LoginKeyRequired { username: String },
	#[serde(rename = "connected")]
	Connected(MembershipChange),
	#[serde(rename = "disconnected")]
	Disconnected(MembershipChange),
	#[serde(rename = "message received")]
	MessageReceived(ChatLine),
	#[serde(rename = "action received")]
	ActionReceived(ChatLine),
	#[serde(rename = "rename")]
	Rename(RenameNotice),
	#[serde(rename = "return color")]
	ReturnColor { color: String },
	#[serde(rename = "userlist")]
	Userlist { users: Vec<RosterEntry> },
	#[serde(rename = "drawing received")]
	DrawingReceived(Drawing),
	#[serde(rename = "add emote")]
	AddEmote { key: String, uri: String },
	#[serde(rename = "remove emote")]
	RemoveEmote { key: String },
	#[serde(rename = "password set")]
	PasswordSet { password: String },
	#[serde(rename = "password activated")]
	PasswordActivated { username: String },
	#[serde(rename = "password deactivated")]
	PasswordDeactivated { username: String, msg: String },
}

impl ServerEvent {
	pub fn error(msg: impl Into<String>) -> Self {
		ServerEvent::Error { msg: msg.into() }
	}

	pub fn warning(msg: impl Into<String>) -> Self {
		ServerEvent::Warning { msg: msg.into() }
	}

	pub fn server(msg: impl Into<String>) -> Self {
		ServerEvent::Server { msg: msg.into() }
	}

	/// Wire event name, for logs and metrics labels.
	pub const fn event_name(&self) -> &'static str {
		match self {
			ServerEvent::Error { .. } => "error",
			ServerEvent::Warning { .. } => "warning",
			ServerEvent::Server { .. } => "server",
			ServerEvent::LoginSuccess { .. } => "login success",
			ServerEvent::LoginKeyRequired { .. } => "login key required",
			ServerEvent::Connected(_) => "connected",
			ServerEvent::Disconnected(_) => "disconnected",
			ServerEvent::MessageReceived(_) => "message received",
			ServerEvent::ActionReceived(_) => "action received",
			ServerEvent::Rename(_) => "rename",
			ServerEvent::ReturnColor { .. } => "return color",
			ServerEvent::Userlist { .. } => "userlist",
			ServerEvent::DrawingReceived(_) => "drawing received",
			ServerEvent::AddEmote { .. } => "add emote",
			ServerEvent::RemoveEmote { .. } => "remove emote",
			ServerEvent::PasswordSet { .. } => "password set",
			ServerEvent::PasswordActivated { .. } => "password activated",
			ServerEvent::PasswordDeactivated { .. } => "password deactivated",
		}
	}

	/// Text payload of `error` / `warning` / `server` events.
	pub fn notice_text(&self) -> Option<&str> {
		match self {
			ServerEvent::Error { msg } | ServerEvent::Warning { msg } | ServerEvent::Server { msg } => Some(msg),
			_ => None,
		}
	}
}
