#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use streamchat_domain::{DomainEvent, EventKind, PendingKind, PendingMessage, RgbColor, Role, RoomKey};
use streamchat_protocol::{ChatLine, ServerEvent};
use tracing::{debug, info, warn};

use crate::config::ChatSettings;
use crate::server::registry::RoomSpeaker;
use crate::server::state::ChatState;
use crate::util::time::unix_now_secs;

/// Background task bridging the pending-message queue, viewer counts and the
/// emote catalog into live broadcasts.
///
/// Started by the presence tracker on its Idle -> Running transition; exits on
/// its own once no presence is left.
pub struct RelayPoller {
	state: Arc<ChatState>,
	interval: Duration,
	emote_refresh: Duration,
	/// Last observed live viewer count per room; absent means unknown.
	viewer_counts: HashMap<RoomKey, usize>,
	last_emote_refresh: Option<Instant>,
}

/// Wire the presence tracker so that its first touch spawns a poller.
///
/// The launcher holds only a weak reference to the state.
pub fn install(state: &Arc<ChatState>, chat: &ChatSettings) -> bool {
	let weak = Arc::downgrade(state);
	let chat = chat.clone();
	state.presence.attach_launcher(Box::new(move || {
		let Some(state) = weak.upgrade() else {
			return;
		};
		let poller = RelayPoller::new(state, &chat);
		tokio::spawn(poller.run());
	}))
}

impl RelayPoller {
	pub fn new(state: Arc<ChatState>, chat: &ChatSettings) -> Self {
		Self {
			state,
			interval: chat.poll_interval,
			emote_refresh: chat.emote_refresh,
			viewer_counts: HashMap::new(),
			last_emote_refresh: None,
		}
	}

	pub async fn run(mut self) {
		info!("relay poller running");
		metrics::gauge!("streamchat_server_poller_running").set(1.0);

		loop {
			self.tick().await;

			if self.state.presence.sweep_and_maybe_stop() {
				break;
			}
			tokio::time::sleep(self.interval).await;
		}

		metrics::gauge!("streamchat_server_poller_running").set(0.0);
		info!("relay poller stopped");
	}

	/// One loop body, without the presence sweep.
	pub async fn tick(&mut self) {
		let occupied = self.state.registry.occupied_rooms();
		let speakers = self.state.registry.room_speakers();

		self.relay_pending(&occupied, &speakers).await;
		self.update_viewer_counts(&occupied).await;

		let due = self
			.last_emote_refresh
			.is_none_or(|at| at.elapsed() >= self.emote_refresh);
		if due {
			self.refresh_emotes().await;
		}
	}

	async fn relay_pending(&self, occupied: &HashSet<RoomKey>, speakers: &HashMap<RoomKey, RoomSpeaker>) {
		let pending = match self.state.collab.queue.drain().await {
			Ok(pending) => pending,
			Err(e) => {
				warn!(error = %e, "failed to read pending messages");
				return;
			}
		};

		for msg in pending {
			let room = match msg.room() {
				Ok(room) => room,
				Err(e) => {
					warn!(id = msg.id, error = %e, "pending message has no valid room, dropping");
					self.delete_pending(msg.id).await;
					continue;
				}
			};
			if !occupied.contains(&room) {
				continue;
			}

			self.relay_one(&room, &msg, speakers.get(&room));
			self.delete_pending(msg.id).await;
		}
	}

	fn relay_one(&self, room: &RoomKey, msg: &PendingMessage, speaker: Option<&RoomSpeaker>) {
		let text = self.state.emotes.substitute(&msg.message);
		let (name, color) = match speaker {
			Some(s) => (s.display_name.clone(), s.color),
			None => (room.as_str().to_string(), RgbColor::BLACK),
		};

		let (kind, event) = match &msg.kind {
			PendingKind::Server => (
				EventKind::SendBroadcast {
					broadcast: text.clone(),
				},
				ServerEvent::server(text),
			),
			PendingKind::Action => (
				EventKind::SendAction {
					name: name.clone(),
					action: text.clone(),
				},
				ServerEvent::ActionReceived(speaker_line(name, color, text)),
			),
			PendingKind::Normal => (
				EventKind::SendMessage {
					name: name.clone(),
					message: text.clone(),
				},
				ServerEvent::MessageReceived(speaker_line(name, color, text)),
			),
			PendingKind::Other(other) => {
				warn!(id = msg.id, %room, kind = %other, "unknown pending message type, dropping");
				return;
			}
		};

		debug!(id = msg.id, %room, kind = msg.kind.as_str(), "relaying pending message");
		metrics::counter!("streamchat_server_relayed_messages_total").increment(1);
		self.state
			.collab
			.events
			.append(DomainEvent::new(unix_now_secs(), room.clone(), kind));
		self.state.hub.emit_to_room(room, event);
	}

	async fn delete_pending(&self, id: i64) {
		if let Err(e) = self.state.collab.queue.delete(id).await {
			warn!(id, error = %e, "failed to delete pending message");
		}
	}

	async fn update_viewer_counts(&mut self, occupied: &HashSet<RoomKey>) {
		let mut rooms: HashSet<RoomKey> = occupied.clone();
		rooms.extend(self.viewer_counts.keys().cloned());
		rooms.extend(self.state.presence.tracked_rooms());

		for room in rooms {
			match self.state.collab.directory.lookup(&room).await {
				Ok(Some(_)) => {}
				Ok(None) => continue,
				Err(e) => {
					warn!(%room, error = %e, "streamer lookup failed, skipping viewer count");
					continue;
				}
			}

			let count = self.state.presence.live_viewer_count(&room);
			if self.viewer_counts.get(&room) == Some(&count) {
				continue;
			}

			debug!(%room, count, "viewer count changed");
			self.viewer_counts.insert(room.clone(), count);
			self.state
				.collab
				.events
				.append(DomainEvent::new(unix_now_secs(), room, EventKind::ViewerCount { count }));
		}
	}

	async fn refresh_emotes(&mut self) {
		let entries = match self.state.collab.catalog.list_all().await {
			Ok(entries) => entries,
			Err(e) => {
				warn!(error = %e, "failed to load emote catalog");
				return;
			}
		};
		self.last_emote_refresh = Some(Instant::now());

		let diff = self.state.emotes.replace_catalog(entries);
		if diff.is_empty() {
			return;
		}

		info!(added = diff.added.len(), removed = diff.removed.len(), "emote catalog changed");
		for (key, uri) in diff.added {
			self.state.hub.emit_to_all(ServerEvent::AddEmote { key, uri });
		}
		for key in diff.removed {
			self.state.hub.emit_to_all(ServerEvent::RemoveEmote { key });
		}
	}
}

fn speaker_line(name: String, color: RgbColor, message: String) -> ChatLine {
	ChatLine {
		username: name,
		kind: Role::Admin,
		color: color.to_html(),
		message,
	}
}
