#![forbid(unsafe_code)]

use std::sync::Arc;

use streamchat_domain::{ConnId, DomainEvent, EventKind, RoomKey, color};
use streamchat_protocol::{ChatLine, Drawing, LoginRequest, MembershipChange, RenameNotice, ServerEvent};
use tracing::{debug, info, warn};

use crate::server::command::{CommandKind, ParsedLine, help_lines, parse_line};
use crate::server::drawing::validate_drawing;
use crate::server::registry::{Change, ConnectionIdentity, LoginError, ModAction, ModerationError, RenameError, Renamed};
use crate::server::state::ChatState;
use crate::util::time::unix_now_secs;

const MUTED: &str = "You are muted!";
const NOT_AUTHENTICATED: &str = "User is not authenticated?";

/// Per-event handlers for one socket's inbound traffic.
///
/// Handlers never fail: every branch ends in a reply, a broadcast, or both.
#[derive(Clone)]
pub struct ChatDispatcher {
	state: Arc<ChatState>,
}

impl ChatDispatcher {
	pub fn new(state: Arc<ChatState>) -> Self {
		Self { state }
	}

	pub fn state(&self) -> &Arc<ChatState> {
		&self.state
	}

	pub fn on_connect(&self, conn: ConnId) {
		if self.state.registry.logout(conn).is_some() {
			warn!(conn_id = %conn, "dropped stale identity on connect");
		}
		self.state.presence.touch(conn, None);
	}

	/// Synchronous teardown: identity and presence are gone before this returns.
	pub fn on_disconnect(&self, conn: ConnId) {
		self.state.presence.remove(conn);
		self.state.hub.unregister(conn);

		let Some(identity) = self.state.registry.logout(conn) else {
			return;
		};

		info!(conn_id = %conn, room = %identity.room, name = %identity.display_name, "chat logout");
		self.log(
			&identity.room,
			EventKind::LeaveChat {
				name: identity.display_name.clone(),
			},
		);
		self.state.hub.emit_to_room(
			&identity.room,
			ServerEvent::Disconnected(MembershipChange {
				username: identity.display_name.clone(),
				kind: identity.role,
				color: identity.html_color(),
				users: self.state.registry.roster_of(&identity.room),
			}),
		);
	}

	pub fn on_presence(&self, conn: ConnId, streamer: Option<&str>) {
		let Some(room) = streamer.and_then(|s| RoomKey::new(s).ok()) else {
			return;
		};
		self.state.presence.touch(conn, Some(room));
	}

	pub async fn on_login(&self, conn: ConnId, remote_addr: &str, req: &LoginRequest) {
		let identity = match self.state.registry.login(conn, remote_addr, req, &self.state.collab).await {
			Ok(identity) => identity,
			Err(LoginError::KeyRequired { canonical }) => {
				debug!(conn_id = %conn, streamer = %canonical, "login key required");
				self.state
					.hub
					.emit_to_connection(conn, ServerEvent::LoginKeyRequired { username: canonical });
				return;
			}
			Err(e) => {
				debug!(conn_id = %conn, error = %e, "login rejected");
				metrics::counter!("streamchat_server_login_rejected_total").increment(1);
				self.state.hub.emit_to_connection(conn, ServerEvent::error(e.to_string()));
				return;
			}
		};

		metrics::counter!("streamchat_server_logins_total").increment(1);
		let room = identity.room.clone();
		self.state.presence.touch(conn, Some(room.clone()));
		self.state.hub.join_room(conn, room.clone());

		self.state.hub.emit_to_connection(
			conn,
			ServerEvent::LoginSuccess {
				username: identity.display_name.clone(),
			},
		);
		self.state.hub.emit_to_room(
			&room,
			ServerEvent::Connected(MembershipChange {
				username: identity.display_name.clone(),
				kind: identity.role,
				color: identity.html_color(),
				users: self.state.registry.roster_of(&room),
			}),
		);
		self.log(
			&room,
			EventKind::JoinChat {
				name: identity.display_name.clone(),
			},
		);

		if identity.role.is_admin() {
			self.reply(conn, "You have admin rights.");
		}
	}

	pub fn on_get_color(&self, conn: ConnId) {
		match self.state.registry.get(conn) {
			Some(identity) => self.state.hub.emit_to_connection(
				conn,
				ServerEvent::ReturnColor {
					color: identity.html_color(),
				},
			),
			None => self.state.hub.emit_to_connection(conn, ServerEvent::error(NOT_AUTHENTICATED)),
		}
	}

	pub fn on_drawing(&self, conn: ConnId, src: &str) {
		let Some(identity) = self.state.registry.get(conn) else {
			self.state.hub.emit_to_connection(conn, ServerEvent::error(NOT_AUTHENTICATED));
			return;
		};
		self.state.presence.touch(conn, Some(identity.room.clone()));

		let src = src.trim();
		if let Err(e) = validate_drawing(src) {
			debug!(conn_id = %conn, error = %e, "drawing rejected");
			self.reply(conn, "Invalid drawing received!");
			return;
		}

		if identity.muted {
			self.reply(conn, MUTED);
			return;
		}

		self.log(
			&identity.room,
			EventKind::SendDrawing {
				name: identity.display_name.clone(),
				drawing: src.to_string(),
			},
		);
		self.state.hub.emit_to_room(
			&identity.room,
			ServerEvent::DrawingReceived(Drawing {
				username: identity.display_name.clone(),
				kind: identity.role,
				color: identity.html_color(),
				src: src.to_string(),
			}),
		);
	}

	pub async fn on_message(&self, conn: ConnId, text: &str) {
		let Some(identity) = self.state.registry.get(conn) else {
			self.state.hub.emit_to_connection(conn, ServerEvent::error(NOT_AUTHENTICATED));
			return;
		};
		if text.trim().is_empty() {
			self.state
				.hub
				.emit_to_connection(conn, ServerEvent::warning("Message cannot be blank"));
			return;
		}

		self.state.presence.touch(conn, Some(identity.room.clone()));

		let line = parse_line(text);
		metrics::counter!("streamchat_server_commands_total", "command" => line.kind.as_str()).increment(1);

		match line.kind {
			CommandKind::Say => self.say(&identity, line.rest, false),
			CommandKind::Action => self.say(&identity, line.rest, true),
			CommandKind::Color => self.set_color(&identity, line.rest),
			CommandKind::RenameSelf => self.rename_self(&identity, line.rest),
			CommandKind::Help => {
				for msg in help_lines(identity.role.is_admin(), identity.role.is_privileged()) {
					self.reply(conn, msg);
				}
			}
			CommandKind::Users => self.state.hub.emit_to_connection(
				conn,
				ServerEvent::Userlist {
					users: self.state.registry.roster_of(&identity.room),
				},
			),
			CommandKind::Settings => self.show_settings(&identity, &line).await,
			CommandKind::Mute => self.moderate(&identity, &line, ModAction::Mute),
			CommandKind::Unmute => self.moderate(&identity, &line, ModAction::Unmute),
			CommandKind::Mod => self.moderate(&identity, &line, ModAction::Promote),
			CommandKind::Demod => self.moderate(&identity, &line, ModAction::Demote),
			CommandKind::RenameOther => self.rename_other(&identity, &line),
			CommandKind::Description => self.set_description(&identity, &line).await,
			CommandKind::Password => self.set_password(&identity, &line).await,
			CommandKind::Unknown => self.unrecognized(conn, line.token),
		}
	}

	fn say(&self, identity: &ConnectionIdentity, text: &str, action: bool) {
		if identity.muted {
			self.reply(identity.conn, MUTED);
			return;
		}

		let message = self.state.emotes.substitute(text);
		let name = identity.display_name.clone();
		let kind = if action {
			EventKind::SendAction {
				name,
				action: message.clone(),
			}
		} else {
			EventKind::SendMessage {
				name,
				message: message.clone(),
			}
		};
		self.log(&identity.room, kind);

		let line = ChatLine {
			username: identity.display_name.clone(),
			kind: identity.role,
			color: identity.html_color(),
			message,
		};
		let event = if action {
			ServerEvent::ActionReceived(line)
		} else {
			ServerEvent::MessageReceived(line)
		};
		self.state.hub.emit_to_room(&identity.room, event);
	}

	fn set_color(&self, identity: &ConnectionIdentity, requested: &str) {
		if identity.muted {
			self.reply(identity.conn, MUTED);
			return;
		}

		let Some(resolved) = color::resolve(requested) else {
			self.reply(
				identity.conn,
				format!(
					"Invalid color {requested} specified, try a color name, an HTML color like #ff00ff or \"random\" for a random color."
				),
			);
			return;
		};
		let Some(updated) = self.state.registry.set_color(identity.conn, resolved) else {
			self.state
				.hub
				.emit_to_connection(identity.conn, ServerEvent::error(NOT_AUTHENTICATED));
			return;
		};

		self.state.hub.emit_to_room(
			&updated.room,
			ServerEvent::ActionReceived(ChatLine {
				username: updated.display_name.clone(),
				kind: updated.role,
				color: updated.html_color(),
				message: "changed their color!".to_string(),
			}),
		);
		self.state.hub.emit_to_connection(
			updated.conn,
			ServerEvent::ReturnColor {
				color: updated.html_color(),
			},
		);
	}

	fn rename_self(&self, identity: &ConnectionIdentity, new_name: &str) {
		if identity.muted {
			self.reply(identity.conn, MUTED);
			return;
		}

		match self.state.registry.rename_self(identity.conn, new_name) {
			Ok(renamed) => self.announce_rename(renamed),
			Err(RenameError::NotLoggedIn) => {
				self.state
					.hub
					.emit_to_connection(identity.conn, ServerEvent::error(NOT_AUTHENTICATED));
			}
			Err(e) => self.reply(identity.conn, e.to_string()),
		}
	}

	fn rename_other(&self, identity: &ConnectionIdentity, line: &ParsedLine<'_>) {
		if !identity.role.is_privileged() {
			self.unrecognized(identity.conn, line.token);
			return;
		}

		match self.state.registry.rename_other(identity.conn, line.rest) {
			Ok(renamed) => self.announce_rename(renamed),
			Err(RenameError::NotPermitted) => self.unrecognized(identity.conn, line.token),
			Err(RenameError::NotLoggedIn) => {
				self.state
					.hub
					.emit_to_connection(identity.conn, ServerEvent::error(NOT_AUTHENTICATED));
			}
			Err(e) => self.reply(identity.conn, e.to_string()),
		}
	}

	fn announce_rename(&self, renamed: Renamed) {
		let Renamed { old_name, identity } = renamed;
		info!(conn_id = %identity.conn, room = %identity.room, old = %old_name, new = %identity.display_name, "rename");

		self.log(
			&identity.room,
			EventKind::ChangeName {
				old_name: old_name.clone(),
				new_name: identity.display_name.clone(),
			},
		);
		self.state.hub.emit_to_room(
			&identity.room,
			ServerEvent::Rename(RenameNotice {
				newname: identity.display_name.clone(),
				oldname: old_name,
				kind: identity.role,
				color: identity.html_color(),
				users: self.state.registry.roster_of(&identity.room),
			}),
		);
	}

	fn moderate(&self, identity: &ConnectionIdentity, line: &ParsedLine<'_>, action: ModAction) {
		let permitted = if action.admin_only() {
			identity.role.is_admin()
		} else {
			identity.role.is_privileged()
		};
		if !permitted {
			self.unrecognized(identity.conn, line.token);
			return;
		}

		let target_name = line.rest.trim().to_lowercase();
		let registry = &self.state.registry;
		let outcome = match action {
			ModAction::Mute => registry.set_muted(identity.conn, &target_name, true),
			ModAction::Unmute => registry.set_muted(identity.conn, &target_name, false),
			ModAction::Promote => registry.set_moderator(identity.conn, &target_name, true),
			ModAction::Demote => registry.set_moderator(identity.conn, &target_name, false),
		};
		let moderated = match outcome {
			Ok(moderated) => moderated,
			Err(ModerationError::NotPermitted) => {
				self.unrecognized(identity.conn, line.token);
				return;
			}
			Err(ModerationError::NotLoggedIn) => {
				self.state
					.hub
					.emit_to_connection(identity.conn, ServerEvent::error(NOT_AUTHENTICATED));
				return;
			}
			Err(e) => {
				debug!(conn_id = %identity.conn, %action, error = %e, "moderation denied");
				self.reply(identity.conn, e.to_string());
				return;
			}
		};

		if moderated.change == Change::Unchanged {
			self.reply(identity.conn, action.unchanged(&target_name));
			return;
		}

		let target = moderated.target;
		info!(room = %identity.room, actor = %identity.display_name, target = %target.display_name, %action, "moderation applied");

		let name = target.display_name.clone();
		let kind = match action {
			ModAction::Mute => EventKind::MuteUser { name },
			ModAction::Unmute => EventKind::UnmuteUser { name },
			ModAction::Promote => EventKind::ModUser { name },
			ModAction::Demote => EventKind::DemodUser { name },
		};
		self.log(&identity.room, kind);

		self.reply(identity.conn, action.applied(&target_name));
		self.reply(target.conn, action.target_notice());
	}

	async fn show_settings(&self, identity: &ConnectionIdentity, line: &ParsedLine<'_>) {
		if !identity.role.is_admin() {
			self.unrecognized(identity.conn, line.token);
			return;
		}

		let profile = match self.state.collab.directory.lookup(&identity.room).await {
			Ok(Some(profile)) => profile,
			Ok(None) => {
				self.reply(identity.conn, "Error looking up settings!");
				return;
			}
			Err(e) => {
				warn!(room = %identity.room, error = %e, "settings lookup failed");
				self.reply(identity.conn, "Error looking up settings!");
				return;
			}
		};

		match profile.description.as_deref().filter(|d| !d.is_empty()) {
			Some(description) => self.reply(identity.conn, format!("Description: {description}")),
			None => self.reply(identity.conn, "No stream description"),
		}
		match profile.viewer_password.as_deref().filter(|p| !p.is_empty()) {
			Some(password) => self.reply(identity.conn, format!("Stream password: {password}")),
			None => self.reply(identity.conn, "No stream password"),
		}
	}

	async fn set_description(&self, identity: &ConnectionIdentity, line: &ParsedLine<'_>) {
		if !identity.role.is_admin() {
			self.unrecognized(identity.conn, line.token);
			return;
		}

		let description = self.state.emotes.substitute(line.rest.trim());
		if let Err(e) = self
			.state
			.collab
			.directory
			.set_description(&identity.room, &description)
			.await
		{
			warn!(room = %identity.room, error = %e, "failed to store description");
			self.reply(identity.conn, "Error updating settings!");
			return;
		}

		self.log(&identity.room, EventKind::SetDescription { description });
		self.reply(identity.conn, "Stream description updated!");
	}

	async fn set_password(&self, identity: &ConnectionIdentity, line: &ParsedLine<'_>) {
		if !identity.role.is_admin() {
			self.unrecognized(identity.conn, line.token);
			return;
		}

		let password = Some(line.rest.trim()).filter(|p| !p.is_empty());
		if let Err(e) = self
			.state
			.collab
			.directory
			.set_viewer_password(&identity.room, password)
			.await
		{
			warn!(room = %identity.room, error = %e, "failed to store viewer password");
			self.reply(identity.conn, "Error updating settings!");
			return;
		}

		self.log(
			&identity.room,
			EventKind::SetViewerPassword {
				password: password.map(str::to_string),
			},
		);

		let room = identity.room.as_str().to_string();
		match password {
			Some(password) => {
				self.reply(identity.conn, format!("Stream password set to \"{password}\"!"));
				self.state.hub.emit_to_connection(
					identity.conn,
					ServerEvent::PasswordSet {
						password: password.to_string(),
					},
				);
				self.state
					.hub
					.emit_to_room(&identity.room, ServerEvent::PasswordActivated { username: room });
			}
			None => {
				self.reply(identity.conn, "Stream password removed!");
				self.state.hub.emit_to_room(
					&identity.room,
					ServerEvent::PasswordDeactivated {
						username: room,
						msg: "Stream password has been removed.".to_string(),
					},
				);
			}
		}
	}

	fn unrecognized(&self, conn: ConnId, token: &str) {
		self.reply(conn, format!("Unrecognized command '{token}', use '/help' for info."));
	}

	fn reply(&self, conn: ConnId, msg: impl Into<String>) {
		self.state.hub.emit_to_connection(conn, ServerEvent::server(msg));
	}

	fn log(&self, room: &RoomKey, kind: EventKind) {
		self.state
			.collab
			.events
			.append(DomainEvent::new(unix_now_secs(), room.clone(), kind));
	}
}
