#![forbid(unsafe_code)]

use std::sync::Arc;

use serde::Serialize;

use crate::config::ChatSettings;
use crate::server::emotes::EmoteRenderer;
use crate::server::hub::SocketHub;
use crate::server::presence::PresenceTracker;
use crate::server::registry::RoomRegistry;
use crate::server::store::Collaborators;

/// Shared chat state: the two mutable maps plus the surfaces they talk to.
///
/// Created once at startup and handed to every connection and to the poller.
pub struct ChatState {
	pub hub: SocketHub,
	pub presence: PresenceTracker,
	pub registry: RoomRegistry,
	pub emotes: Arc<EmoteRenderer>,
	pub collab: Collaborators,
}

/// `/statsz` snapshot.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatStats {
	pub connections: usize,
	pub identities: usize,
	pub presence_entries: usize,
	pub poller_running: bool,
	pub custom_emotes: usize,
	pub protocol_version: u32,
}

impl ChatState {
	pub fn new(chat: &ChatSettings, hub: SocketHub, emotes: Arc<EmoteRenderer>, collab: Collaborators) -> Arc<Self> {
		Arc::new(Self {
			hub,
			presence: PresenceTracker::new(chat.presence_timeout),
			registry: RoomRegistry::new(emotes.clone(), chat.max_name_length),
			emotes,
			collab,
		})
	}

	pub fn stats(&self) -> ChatStats {
		ChatStats {
			connections: self.hub.connection_count(),
			identities: self.registry.len(),
			presence_entries: self.presence.len(),
			poller_running: self.presence.is_poller_running(),
			custom_emotes: self.emotes.catalog_len(),
			protocol_version: streamchat_protocol::version::PROTOCOL_VERSION_U32,
		}
	}
}
