#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use streamchat_domain::{ConnId, RoomKey};
use streamchat_protocol::ServerEvent;
use tokio::sync::mpsc;
use tracing::debug;

/// Fan-out surface for every live socket: per-connection queues plus room membership.
#[derive(Debug, Clone)]
pub struct SocketHub {
	inner: Arc<Mutex<Inner>>,
	cfg: SocketHubConfig,
}

#[derive(Debug, Clone)]
pub struct SocketHubConfig {
	/// Maximum number of queued events per connection.
	pub queue_capacity: usize,

	pub debug_logs: bool,
}

impl Default for SocketHubConfig {
	fn default() -> Self {
		Self {
			queue_capacity: 256,
			debug_logs: false,
		}
	}
}

#[derive(Debug, Default)]
struct Inner {
	conns: HashMap<ConnId, ConnEntry>,
	rooms: HashMap<RoomKey, BTreeSet<ConnId>>,
}

#[derive(Debug)]
struct ConnEntry {
	tx: mpsc::Sender<ServerEvent>,
	room: Option<RoomKey>,
	dropped: u64,
}

impl SocketHub {
	pub fn new(cfg: SocketHubConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			cfg,
		}
	}

	/// Register a connection and return its outbound queue.
	///
	/// Re-registering an id replaces the previous queue and room membership.
	pub fn register(&self, conn: ConnId) -> mpsc::Receiver<ServerEvent> {
		let (tx, rx) = mpsc::channel(self.cfg.queue_capacity.max(1));

		let mut inner = self.inner.lock();
		if let Some(old) = inner.conns.remove(&conn) {
			leave_room(&mut inner.rooms, conn, old.room.as_ref());
		}
		inner.conns.insert(
			conn,
			ConnEntry {
				tx,
				room: None,
				dropped: 0,
			},
		);
		rx
	}

	pub fn unregister(&self, conn: ConnId) {
		let mut inner = self.inner.lock();
		if let Some(entry) = inner.conns.remove(&conn) {
			leave_room(&mut inner.rooms, conn, entry.room.as_ref());

			if self.cfg.debug_logs && entry.dropped > 0 {
				debug!(conn_id = conn.0, dropped = entry.dropped, "socket hub: connection dropped events");
			}
		}
	}

	/// Put `conn` into `room`, leaving any previous room.
	pub fn join_room(&self, conn: ConnId, room: RoomKey) {
		let mut inner = self.inner.lock();
		let Inner { conns, rooms } = &mut *inner;
		let Some(entry) = conns.get_mut(&conn) else {
			return;
		};

		if entry.room.as_ref() == Some(&room) {
			return;
		}

		leave_room(rooms, conn, entry.room.as_ref());
		rooms.entry(room.clone()).or_default().insert(conn);
		entry.room = Some(room);
	}

	pub fn emit_to_connection(&self, conn: ConnId, event: ServerEvent) {
		let mut inner = self.inner.lock();
		if let Some(entry) = inner.conns.get_mut(&conn) {
			deliver(entry, event);
		}
	}

	pub fn emit_to_room(&self, room: &RoomKey, event: ServerEvent) {
		let mut inner = self.inner.lock();
		let Inner { conns, rooms } = &mut *inner;
		let Some(members) = rooms.get(room) else {
			return;
		};

		let mut dropped = 0u64;
		for conn in members {
			if let Some(entry) = conns.get_mut(conn)
				&& !deliver(entry, event.clone())
			{
				dropped += 1;
			}
		}

		if self.cfg.debug_logs && dropped > 0 {
			debug!(room = %room, dropped, event = event.event_name(), "socket hub: dropped due to full queues");
		}
	}

	/// Deliver to every registered connection regardless of room.
	pub fn emit_to_all(&self, event: ServerEvent) {
		let mut inner = self.inner.lock();
		for entry in inner.conns.values_mut() {
			deliver(entry, event.clone());
		}
	}

	pub fn connection_count(&self) -> usize {
		self.inner.lock().conns.len()
	}

	#[cfg(test)]
	pub fn room_member_count(&self, room: &RoomKey) -> usize {
		self.inner.lock().rooms.get(room).map(BTreeSet::len).unwrap_or(0)
	}
}

/// Returns false when the event was not queued.
fn deliver(entry: &mut ConnEntry, event: ServerEvent) -> bool {
	match entry.tx.try_send(event) {
		Ok(()) => true,
		Err(mpsc::error::TrySendError::Full(_)) => {
			entry.dropped = entry.dropped.saturating_add(1);
			metrics::counter!("streamchat_server_outbound_dropped_total").increment(1);
			false
		}
		Err(mpsc::error::TrySendError::Closed(_)) => false,
	}
}

fn leave_room(rooms: &mut HashMap<RoomKey, BTreeSet<ConnId>>, conn: ConnId, room: Option<&RoomKey>) {
	let Some(room) = room else {
		return;
	};

	if let Some(members) = rooms.get_mut(room) {
		members.remove(&conn);
		if members.is_empty() {
			rooms.remove(room);
		}
	}
}
