#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use streamchat_domain::{DomainEvent, EmoteCatalogEntry, PendingMessage, RoomKey, StreamerProfile};

use super::{EmoteCatalog, EventLog, PendingQueue, StreamerDirectory};

/// In-process store used in dev mode and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
	inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
	streamers: HashMap<RoomKey, StreamerProfile>,
	pending: BTreeMap<i64, PendingMessage>,
	#[cfg(test)]
	next_pending_id: i64,
	emotes: Vec<EmoteCatalogEntry>,
	events: Vec<DomainEvent>,
	unavailable: bool,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_streamer(&self, username: &str, key: &str) -> anyhow::Result<()> {
		let room = RoomKey::new(username)?;
		self.inner.lock().streamers.insert(
			room,
			StreamerProfile {
				canonical_name: username.trim().to_string(),
				secret_key: key.to_string(),
				description: None,
				viewer_password: None,
			},
		);
		Ok(())
	}

	/// Queue a message the way the HTTP API would. Returns the row id.
	#[cfg(test)]
	pub fn queue_pending(&self, username: &str, kind: &str, message: &str) -> i64 {
		let mut inner = self.inner.lock();
		inner.next_pending_id += 1;
		let id = inner.next_pending_id;
		inner.pending.insert(
			id,
			PendingMessage {
				id,
				username: username.to_string(),
				kind: streamchat_domain::PendingKind::parse(kind),
				message: message.to_string(),
			},
		);
		id
	}

	#[cfg(test)]
	pub fn pending(&self) -> Vec<PendingMessage> {
		self.inner.lock().pending.values().cloned().collect()
	}

	#[cfg(test)]
	pub fn set_emotes(&self, emotes: Vec<EmoteCatalogEntry>) {
		self.inner.lock().emotes = emotes;
	}

	#[cfg(test)]
	pub fn events(&self) -> Vec<DomainEvent> {
		self.inner.lock().events.clone()
	}

	#[cfg(test)]
	pub fn profile(&self, room: &RoomKey) -> Option<StreamerProfile> {
		self.inner.lock().streamers.get(room).cloned()
	}

	/// Make every call fail, simulating a database outage.
	#[cfg(test)]
	pub fn set_unavailable(&self, unavailable: bool) {
		self.inner.lock().unavailable = unavailable;
	}

	fn check(inner: &Inner) -> anyhow::Result<()> {
		if inner.unavailable {
			Err(anyhow!("memory store unavailable"))
		} else {
			Ok(())
		}
	}
}

#[async_trait]
impl StreamerDirectory for MemoryStore {
	async fn lookup(&self, room: &RoomKey) -> anyhow::Result<Option<StreamerProfile>> {
		let inner = self.inner.lock();
		Self::check(&inner)?;
		Ok(inner.streamers.get(room).cloned())
	}

	async fn set_description(&self, room: &RoomKey, text: &str) -> anyhow::Result<()> {
		let mut inner = self.inner.lock();
		Self::check(&inner)?;
		let profile = inner
			.streamers
			.get_mut(room)
			.ok_or_else(|| anyhow!("unknown streamer {room}"))?;
		profile.description = Some(text.to_string());
		Ok(())
	}

	async fn set_viewer_password(&self, room: &RoomKey, password: Option<&str>) -> anyhow::Result<()> {
		let mut inner = self.inner.lock();
		Self::check(&inner)?;
		let profile = inner
			.streamers
			.get_mut(room)
			.ok_or_else(|| anyhow!("unknown streamer {room}"))?;
		profile.viewer_password = password.map(str::to_string);
		Ok(())
	}
}

#[async_trait]
impl PendingQueue for MemoryStore {
	async fn drain(&self) -> anyhow::Result<Vec<PendingMessage>> {
		let inner = self.inner.lock();
		Self::check(&inner)?;
		Ok(inner.pending.values().cloned().collect())
	}

	async fn delete(&self, id: i64) -> anyhow::Result<()> {
		let mut inner = self.inner.lock();
		Self::check(&inner)?;
		inner.pending.remove(&id);
		Ok(())
	}

	async fn purge_all_for(&self, room: &RoomKey) -> anyhow::Result<()> {
		let mut inner = self.inner.lock();
		Self::check(&inner)?;
		inner.pending.retain(|_, m| !room.is_streamer_name(&m.username));
		Ok(())
	}
}

#[async_trait]
impl EmoteCatalog for MemoryStore {
	async fn list_all(&self) -> anyhow::Result<Vec<EmoteCatalogEntry>> {
		let inner = self.inner.lock();
		Self::check(&inner)?;
		Ok(inner.emotes.clone())
	}
}

#[async_trait]
impl EventLog for MemoryStore {
	async fn append(&self, event: &DomainEvent) -> anyhow::Result<()> {
		let mut inner = self.inner.lock();
		Self::check(&inner)?;
		inner.events.push(event.clone());
		Ok(())
	}
}
