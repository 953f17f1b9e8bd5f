#![forbid(unsafe_code)]

pub mod color;
pub mod event;

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use color::RgbColor;
pub use event::{DomainEvent, EventKind};

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Chat partition key: the lowercased streamer handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomKey(String);

impl RoomKey {
	/// Create a room key, trimming and lowercasing the handle.
	pub fn new(handle: impl AsRef<str>) -> Result<Self, ParseIdError> {
		let handle = handle.as_ref().trim();
		if handle.is_empty() {
			return Err(ParseIdError::Empty);
		}
		if handle.chars().any(char::is_whitespace) {
			return Err(ParseIdError::InvalidFormat(format!("room key contains whitespace: {handle}")));
		}
		Ok(Self(handle.to_lowercase()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}

	/// Whether `name` addresses this room's own streamer.
	pub fn is_streamer_name(&self, name: &str) -> bool {
		name.to_lowercase() == self.0
	}
}

impl fmt::Display for RoomKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RoomKey {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomKey::new(s)
	}
}

/// Server-assigned handle of one live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "conn-{}", self.0)
	}
}

/// Chat role of a logged-in identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	#[default]
	Normal,
	Moderator,
	Admin,
}

impl Role {
	/// Stable string identifier, as sent on the wire.
	pub const fn as_str(self) -> &'static str {
		match self {
			Role::Normal => "normal",
			Role::Moderator => "moderator",
			Role::Admin => "admin",
		}
	}

	const fn rank(self) -> u8 {
		match self {
			Role::Normal => 0,
			Role::Moderator => 1,
			Role::Admin => 2,
		}
	}

	/// Moderators and admins may use the moderation commands.
	pub const fn is_privileged(self) -> bool {
		matches!(self, Role::Moderator | Role::Admin)
	}

	pub const fn is_admin(self) -> bool {
		matches!(self, Role::Admin)
	}

	/// Single source of truth for mute/unmute/mod/demod/rename-other.
	///
	/// The actor must be privileged and strictly outrank the target, so nobody
	/// can act on an admin (not even the admin itself) and moderators cannot act
	/// on each other.
	pub const fn can_moderate(actor: Role, target: Role) -> bool {
		actor.is_privileged() && actor.rank() > target.rank()
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Kind of an API-queued chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingKind {
	Normal,
	Action,
	Server,
	Other(String),
}

impl PendingKind {
	pub fn parse(s: &str) -> Self {
		match s.trim() {
			"normal" => PendingKind::Normal,
			"action" => PendingKind::Action,
			"server" => PendingKind::Server,
			other => PendingKind::Other(other.to_string()),
		}
	}

	pub fn as_str(&self) -> &str {
		match self {
			PendingKind::Normal => "normal",
			PendingKind::Action => "action",
			PendingKind::Server => "server",
			PendingKind::Other(s) => s,
		}
	}
}

/// A row of the durable pending-message queue fed by the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
	pub id: i64,
	/// Streamer handle as queued; its lowercase form is the room key.
	pub username: String,
	pub kind: PendingKind,
	pub message: String,
}

impl PendingMessage {
	pub fn room(&self) -> Result<RoomKey, ParseIdError> {
		RoomKey::new(&self.username)
	}
}

/// A custom emote known to the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmoteCatalogEntry {
	pub alias: String,
	pub uri: String,
}

impl EmoteCatalogEntry {
	/// Chat token for this emote (`:alias:`).
	pub fn key(&self) -> String {
		format!(":{}:", self.alias)
	}
}

/// Streamer directory record for a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamerProfile {
	/// Username as stored, with its original casing.
	pub canonical_name: String,
	pub secret_key: String,
	pub description: Option<String>,
	pub viewer_password: Option<String>,
}
