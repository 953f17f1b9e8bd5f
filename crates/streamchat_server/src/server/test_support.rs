#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use streamchat_domain::{ConnId, DomainEvent};
use streamchat_protocol::{LoginRequest, ServerEvent};
use tokio::sync::mpsc;

use crate::config::ChatSettings;
use crate::server::dispatch::ChatDispatcher;
use crate::server::emotes::EmoteRenderer;
use crate::server::hub::{SocketHub, SocketHubConfig};
use crate::server::state::ChatState;
use crate::server::store::{Collaborators, MemoryStore};

pub const ALICE_KEY: &str = "alice-secret";

/// Chat state over a [`MemoryStore`] with streamer `Alice`. Needs a tokio runtime.
pub struct TestHarness {
	pub store: Arc<MemoryStore>,
	pub state: Arc<ChatState>,
	pub dispatcher: ChatDispatcher,
}

impl TestHarness {
	pub fn new() -> Self {
		Self::with_settings(ChatSettings::default())
	}

	pub fn with_settings(chat: ChatSettings) -> Self {
		let store = Arc::new(MemoryStore::new());
		store.add_streamer("Alice", ALICE_KEY).expect("add streamer");

		let collab = Collaborators::from_store(store.clone());
		let state = ChatState::new(
			&chat,
			SocketHub::new(SocketHubConfig::default()),
			Arc::new(EmoteRenderer::new()),
			collab,
		);
		let dispatcher = ChatDispatcher::new(state.clone());

		Self {
			store,
			state,
			dispatcher,
		}
	}

	pub fn connect(&self, id: u64) -> (ConnId, mpsc::Receiver<ServerEvent>) {
		let conn = ConnId(id);
		let rx = self.state.hub.register(conn);
		self.dispatcher.on_connect(conn);
		(conn, rx)
	}

	pub async fn login(&self, conn: ConnId, username: &str, streamer: &str, key: Option<&str>) {
		let req = LoginRequest {
			username: username.to_string(),
			streamer: streamer.to_string(),
			color: None,
			key: key.map(str::to_string),
		};
		self.dispatcher.on_login(conn, "127.0.0.1", &req).await;
	}

	/// Wait until the event log writer has stored at least `count` events.
	pub async fn logged_events(&self, count: usize) -> Vec<DomainEvent> {
		let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
		loop {
			let events = self.store.events();
			if events.len() >= count || tokio::time::Instant::now() >= deadline {
				return events;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	}
}

/// Everything queued for a connection so far.
pub fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
	let mut out = Vec::new();
	while let Ok(event) = rx.try_recv() {
		out.push(event);
	}
	out
}

/// `server` notice texts among `events`.
pub fn notices(events: &[ServerEvent]) -> Vec<String> {
	events
		.iter()
		.filter_map(|e| match e {
			ServerEvent::Server { msg } => Some(msg.clone()),
			_ => None,
		})
		.collect()
}
