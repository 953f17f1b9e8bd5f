#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use streamchat_domain::{ConnId, RgbColor, Role, RoomKey, color};
use streamchat_protocol::{LoginRequest, RosterEntry};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::server::auth::verify_stream_key;
use crate::server::emotes::EmoteRenderer;
use crate::server::store::Collaborators;

/// Chat identity of one logged-in connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionIdentity {
	pub conn: ConnId,
	pub remote_addr: String,
	pub room: RoomKey,
	pub display_name: String,
	pub role: Role,
	pub muted: bool,
	pub color: RgbColor,
}

impl ConnectionIdentity {
	pub fn html_color(&self) -> String {
		self.color.to_html()
	}

	pub fn roster_entry(&self) -> RosterEntry {
		RosterEntry {
			username: self.display_name.clone(),
			kind: self.role,
			color: self.html_color(),
		}
	}

	fn answers_to(&self, name: &str) -> bool {
		self.display_name.to_lowercase() == name.to_lowercase()
	}
}

/// Outcome of an idempotent mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
	Changed,
	Unchanged,
}

#[derive(Debug, Error)]
pub enum LoginError {
	#[error("Connection is already logged in")]
	AlreadyLoggedIn,
	#[error("Username cannot be blank")]
	BlankName,
	#[error("Username cannot be that long")]
	NameTooLong,
	#[error("Streamer does not exist")]
	UnknownStreamer,
	#[error("Username is already taken")]
	NameTaken,
	/// Streamer self-login without a key; the client should prompt for one.
	#[error("Login key required for {canonical}")]
	KeyRequired { canonical: String },
	#[error("Invalid password!")]
	InvalidKey,
	#[error("Error looking up streamer!")]
	Directory(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenameError {
	#[error("User is not authenticated?")]
	NotLoggedIn,
	#[error("Invalid name specified, try a different name.")]
	Blank,
	#[error("Too long of a name specified, try a different name.")]
	TooLong,
	#[error("Name has already been taken, try a different name.")]
	Taken,
	#[error("Unrecognized user '{0}'")]
	UnknownUser(String),
	#[error("Unspecified new username for user '{0}'")]
	MissingNewName(String),
	#[error("User '{0}' cannot be renamed.")]
	Protected(String),
	/// The actor lost the role that allowed the command.
	#[error("not permitted")]
	NotPermitted,
}

/// Role-hierarchy commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModAction {
	Mute,
	Unmute,
	Promote,
	Demote,
}

impl ModAction {
	/// Reply to the issuer when the target's state changed.
	pub fn applied(self, name: &str) -> String {
		match self {
			ModAction::Mute => format!("User '{name}' has been muted."),
			ModAction::Unmute => format!("User '{name}' has been unmuted."),
			ModAction::Promote => format!("User '{name}' has been promoted to moderator."),
			ModAction::Demote => format!("User '{name}' has been demoted from moderator."),
		}
	}

	/// Notice delivered to the target on change.
	pub fn target_notice(self) -> &'static str {
		match self {
			ModAction::Mute => "You have been muted.",
			ModAction::Unmute => "You have been unmuted.",
			ModAction::Promote => "You have been promoted to moderator.",
			ModAction::Demote => "You have been demoted from moderator.",
		}
	}

	pub fn unchanged(self, name: &str) -> String {
		match self {
			ModAction::Mute => format!("User '{name}' is already muted."),
			ModAction::Unmute => format!("User '{name}' is not muted."),
			ModAction::Promote => format!("User '{name}' is already a moderator."),
			ModAction::Demote => format!("User '{name}' is not a moderator."),
		}
	}

	/// Mod and demod are reserved for the room's admin.
	pub const fn admin_only(self) -> bool {
		matches!(self, ModAction::Promote | ModAction::Demote)
	}

	const fn denied_verb(self) -> &'static str {
		match self {
			ModAction::Mute => "muted",
			ModAction::Unmute => "unmuted",
			ModAction::Promote => "promoted to moderator",
			ModAction::Demote => "demoted from moderator",
		}
	}
}

impl fmt::Display for ModAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			ModAction::Mute => "mute",
			ModAction::Unmute => "unmute",
			ModAction::Promote => "mod",
			ModAction::Demote => "demod",
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModerationError {
	#[error("User is not authenticated?")]
	NotLoggedIn,
	#[error("not permitted")]
	NotPermitted,
	#[error("Unrecognized user '{0}'")]
	UnknownUser(String),
	#[error("User '{name}' cannot be {}.", .action.denied_verb())]
	Protected { name: String, action: ModAction },
}

/// A successful rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renamed {
	pub old_name: String,
	/// The renamed identity, after the change.
	pub identity: ConnectionIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Moderated {
	pub change: Change,
	/// The target, after the change.
	pub target: ConnectionIdentity,
}

/// The streamer identity a relayed API message is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSpeaker {
	pub display_name: String,
	pub color: RgbColor,
}

/// Every logged-in identity, keyed by connection.
///
/// The lock is never held across an `.await`; each operation is one critical section.
pub struct RoomRegistry {
	identities: Mutex<HashMap<ConnId, ConnectionIdentity>>,
	emotes: Arc<EmoteRenderer>,
	max_name_length: usize,
}

impl fmt::Debug for RoomRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RoomRegistry")
			.field("identities", &self.len())
			.field("max_name_length", &self.max_name_length)
			.finish_non_exhaustive()
	}
}

impl RoomRegistry {
	pub fn new(emotes: Arc<EmoteRenderer>, max_name_length: usize) -> Self {
		Self {
			identities: Mutex::new(HashMap::new()),
			emotes,
			max_name_length,
		}
	}

	pub async fn login(
		&self,
		conn: ConnId,
		remote_addr: &str,
		req: &LoginRequest,
		collab: &Collaborators,
	) -> Result<ConnectionIdentity, LoginError> {
		if self.identities.lock().contains_key(&conn) {
			return Err(LoginError::AlreadyLoggedIn);
		}

		let requested = req.username.trim();
		if requested.is_empty() {
			return Err(LoginError::BlankName);
		}
		if self.emotes.message_length(requested) > self.max_name_length {
			return Err(LoginError::NameTooLong);
		}

		let room = RoomKey::new(&req.streamer).map_err(|_| LoginError::UnknownStreamer)?;
		let profile = collab
			.directory
			.lookup(&room)
			.await
			.map_err(|e| {
				warn!(%room, error = %e, "streamer lookup failed");
				LoginError::Directory(e.to_string())
			})?
			.ok_or(LoginError::UnknownStreamer)?;

		if self.name_taken(&room, requested) {
			return Err(LoginError::NameTaken);
		}

		let (display_name, role) = if room.is_streamer_name(requested) {
			let Some(key) = req.key.as_deref() else {
				return Err(LoginError::KeyRequired {
					canonical: profile.canonical_name,
				});
			};
			if !verify_stream_key(&profile, key) {
				return Err(LoginError::InvalidKey);
			}
			(profile.canonical_name, Role::Admin)
		} else {
			(requested.to_string(), Role::Normal)
		};

		let identity = ConnectionIdentity {
			conn,
			remote_addr: remote_addr.to_string(),
			room: room.clone(),
			display_name,
			role,
			muted: false,
			color: req.color.as_deref().and_then(color::resolve).unwrap_or(RgbColor::BLACK),
		};

		let first_in_room = {
			let mut identities = self.identities.lock();
			if identities.contains_key(&conn) {
				return Err(LoginError::AlreadyLoggedIn);
			}
			let mut first = true;
			for other in identities.values().filter(|i| i.room == room) {
				first = false;
				if other.answers_to(&identity.display_name) {
					return Err(LoginError::NameTaken);
				}
			}
			identities.insert(conn, identity.clone());
			first
		};

		info!(conn_id = %conn, %room, name = %identity.display_name, role = %identity.role, "chat login");

		if first_in_room {
			debug!(%room, "first member in room, purging stale pending messages");
			if let Err(e) = collab.queue.purge_all_for(&room).await {
				warn!(%room, error = %e, "failed to purge pending messages");
			}
		}

		Ok(identity)
	}

	pub fn logout(&self, conn: ConnId) -> Option<ConnectionIdentity> {
		self.identities.lock().remove(&conn)
	}

	pub fn get(&self, conn: ConnId) -> Option<ConnectionIdentity> {
		self.identities.lock().get(&conn).cloned()
	}

	pub fn roster_of(&self, room: &RoomKey) -> Vec<RosterEntry> {
		let identities = self.identities.lock();
		let mut roster: Vec<RosterEntry> = identities
			.values()
			.filter(|i| &i.room == room)
			.map(ConnectionIdentity::roster_entry)
			.collect();
		roster.sort_by(|a, b| a.username.to_lowercase().cmp(&b.username.to_lowercase()));
		roster
	}

	/// Case-insensitive exact match within `room`.
	#[cfg(test)]
	pub fn find_by_name(&self, room: &RoomKey, name: &str) -> Option<ConnectionIdentity> {
		self.identities
			.lock()
			.values()
			.find(|i| &i.room == room && i.answers_to(name))
			.cloned()
	}

	pub fn rename_self(&self, conn: ConnId, new_name: &str) -> Result<Renamed, RenameError> {
		let new_name = new_name.trim();
		let mut identities = self.identities.lock();
		let room = identities.get(&conn).ok_or(RenameError::NotLoggedIn)?.room.clone();

		if self.emotes.message_length(new_name) > self.max_name_length {
			return Err(RenameError::TooLong);
		}
		if identities.values().any(|i| i.room == room && i.answers_to(new_name)) {
			return Err(RenameError::Taken);
		}
		if new_name.is_empty() {
			return Err(RenameError::Blank);
		}

		let identity = identities.get_mut(&conn).ok_or(RenameError::NotLoggedIn)?;
		let old_name = std::mem::replace(&mut identity.display_name, new_name.to_string());
		Ok(Renamed {
			old_name,
			identity: identity.clone(),
		})
	}

	/// `/rename <existing> <new>`: the longest known name that prefixes `rest`
	/// (followed by a space or the end) is the target.
	pub fn rename_other(&self, actor: ConnId, rest: &str) -> Result<Renamed, RenameError> {
		let rest = rest.trim();
		let mut identities = self.identities.lock();
		let actor_identity = identities.get(&actor).ok_or(RenameError::NotLoggedIn)?;
		if !actor_identity.role.is_privileged() {
			return Err(RenameError::NotPermitted);
		}
		let actor_role = actor_identity.role;
		let room = actor_identity.room.clone();

		let target = split_points(rest)
			.rev()
			.find_map(|at| {
				let prefix = &rest[..at];
				identities
					.values()
					.find(|i| i.room == room && i.answers_to(prefix))
					.map(|i| (i.conn, at))
			});
		let Some((target_conn, at)) = target else {
			return Err(RenameError::UnknownUser(rest.to_string()));
		};

		let new_name = rest[at..].trim();
		if new_name.is_empty() {
			return Err(RenameError::MissingNewName(rest.to_lowercase()));
		}
		if self.emotes.message_length(new_name) > self.max_name_length {
			return Err(RenameError::TooLong);
		}
		if identities.values().any(|i| i.room == room && i.answers_to(new_name)) {
			return Err(RenameError::Taken);
		}

		let target = identities.get_mut(&target_conn).ok_or(RenameError::NotLoggedIn)?;
		if !Role::can_moderate(actor_role, target.role) {
			return Err(RenameError::Protected(target.display_name.to_lowercase()));
		}

		let old_name = std::mem::replace(&mut target.display_name, new_name.to_string());
		Ok(Renamed {
			old_name,
			identity: target.clone(),
		})
	}

	pub fn set_color(&self, conn: ConnId, color: RgbColor) -> Option<ConnectionIdentity> {
		let mut identities = self.identities.lock();
		let identity = identities.get_mut(&conn)?;
		identity.color = color;
		Some(identity.clone())
	}

	pub fn set_muted(&self, actor: ConnId, target_name: &str, muted: bool) -> Result<Moderated, ModerationError> {
		let action = if muted { ModAction::Mute } else { ModAction::Unmute };
		self.moderate(actor, target_name, action)
	}

	pub fn set_moderator(&self, actor: ConnId, target_name: &str, moderator: bool) -> Result<Moderated, ModerationError> {
		let action = if moderator { ModAction::Promote } else { ModAction::Demote };
		self.moderate(actor, target_name, action)
	}

	fn moderate(&self, actor: ConnId, target_name: &str, action: ModAction) -> Result<Moderated, ModerationError> {
		let target_name = target_name.trim().to_lowercase();
		let mut identities = self.identities.lock();

		let actor_identity = identities.get(&actor).ok_or(ModerationError::NotLoggedIn)?;
		let permitted = if action.admin_only() {
			actor_identity.role.is_admin()
		} else {
			actor_identity.role.is_privileged()
		};
		if !permitted {
			return Err(ModerationError::NotPermitted);
		}
		let actor_role = actor_identity.role;
		let room = actor_identity.room.clone();

		let target = identities
			.values_mut()
			.find(|i| i.room == room && i.answers_to(&target_name))
			.ok_or_else(|| ModerationError::UnknownUser(target_name.clone()))?;

		if !Role::can_moderate(actor_role, target.role) {
			return Err(ModerationError::Protected {
				name: target_name,
				action,
			});
		}

		let change = match action {
			ModAction::Mute | ModAction::Unmute => {
				let muted = action == ModAction::Mute;
				let changed = target.muted != muted;
				target.muted = muted;
				changed
			}
			ModAction::Promote | ModAction::Demote => {
				let role = if action == ModAction::Promote {
					Role::Moderator
				} else {
					Role::Normal
				};
				let changed = target.role != role;
				target.role = role;
				changed
			}
		};

		Ok(Moderated {
			change: if change { Change::Changed } else { Change::Unchanged },
			target: target.clone(),
		})
	}

	pub fn occupied_rooms(&self) -> HashSet<RoomKey> {
		self.identities.lock().values().map(|i| i.room.clone()).collect()
	}

	/// Admin display name and color of every room whose streamer is logged in.
	pub fn room_speakers(&self) -> HashMap<RoomKey, RoomSpeaker> {
		self.identities
			.lock()
			.values()
			.filter(|i| i.role.is_admin())
			.map(|i| {
				(
					i.room.clone(),
					RoomSpeaker {
						display_name: i.display_name.clone(),
						color: i.color,
					},
				)
			})
			.collect()
	}

	#[cfg(test)]
	pub fn is_occupied(&self, room: &RoomKey) -> bool {
		self.identities.lock().values().any(|i| &i.room == room)
	}

	pub fn len(&self) -> usize {
		self.identities.lock().len()
	}

	#[cfg(test)]
	pub fn is_empty(&self) -> bool {
		self.identities.lock().is_empty()
	}

	fn name_taken(&self, room: &RoomKey, name: &str) -> bool {
		self.identities
			.lock()
			.values()
			.any(|i| &i.room == room && i.answers_to(name))
	}
}

/// Byte offsets in `s` that end a candidate name: every space, and the end.
fn split_points(s: &str) -> impl DoubleEndedIterator<Item = usize> + '_ {
	s.char_indices()
		.filter(|(_, c)| *c == ' ')
		.map(|(i, _)| i)
		.chain(std::iter::once(s.len()))
}
