#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::Mutex;
use streamchat_domain::{ConnId, RoomKey};
use tracing::{debug, info};

use crate::util::time::unix_now_secs;

/// Starts the relay poller task. Called at most once per Idle -> Running transition.
pub type PollerLauncher = Box<dyn Fn() + Send + Sync>;

/// Liveness of every socket, independent of chat login.
///
/// The same lock guards the presence map and the poller run state, so the
/// poller's "empty, stop" decision and a new connection's "not running, start"
/// decision can never interleave.
pub struct PresenceTracker {
	inner: Mutex<Inner>,
	timeout_secs: i64,
	launcher: OnceLock<PollerLauncher>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
	/// Unset until the first heartbeat names a room.
	pub room: Option<RoomKey>,
	/// Unix seconds.
	pub last_seen: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollerState {
	Idle,
	Running,
}

#[derive(Debug)]
struct Inner {
	entries: HashMap<ConnId, PresenceEntry>,
	poller: PollerState,
}

impl std::fmt::Debug for PresenceTracker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PresenceTracker")
			.field("timeout_secs", &self.timeout_secs)
			.field("launcher_attached", &self.launcher.get().is_some())
			.finish_non_exhaustive()
	}
}

impl PresenceTracker {
	pub fn new(timeout: Duration) -> Self {
		Self {
			inner: Mutex::new(Inner {
				entries: HashMap::new(),
				poller: PollerState::Idle,
			}),
			timeout_secs: timeout.as_secs().max(1) as i64,
			launcher: OnceLock::new(),
		}
	}

	/// Attach the poller launcher. Returns false if one was already attached.
	pub fn attach_launcher(&self, launcher: PollerLauncher) -> bool {
		self.launcher.set(launcher).is_ok()
	}

	pub fn touch(&self, conn: ConnId, room: Option<RoomKey>) {
		self.touch_at(conn, room, unix_now_secs());
	}

	pub fn touch_at(&self, conn: ConnId, room: Option<RoomKey>, now: i64) {
		let start = {
			let mut inner = self.inner.lock();
			inner.entries.insert(conn, PresenceEntry { room, last_seen: now });

			if inner.poller == PollerState::Idle && self.launcher.get().is_some() {
				inner.poller = PollerState::Running;
				true
			} else {
				false
			}
		};

		if start && let Some(launch) = self.launcher.get() {
			info!("starting relay poller");
			launch();
		}
	}

	pub fn remove(&self, conn: ConnId) -> Option<PresenceEntry> {
		self.inner.lock().entries.remove(&conn)
	}

	pub fn live_viewer_count(&self, room: &RoomKey) -> usize {
		self.live_viewer_count_at(room, unix_now_secs())
	}

	pub fn live_viewer_count_at(&self, room: &RoomKey, now: i64) -> usize {
		let oldest = now - self.timeout_secs;
		self.inner
			.lock()
			.entries
			.values()
			.filter(|e| e.room.as_ref() == Some(room) && e.last_seen >= oldest)
			.count()
	}

	/// Drop stale entries without touching the poller state. Returns true if the map is now empty.
	#[cfg(test)]
	pub fn sweep_stale_at(&self, now: i64) -> bool {
		let mut inner = self.inner.lock();
		self.sweep_locked(&mut inner, now);
		inner.entries.is_empty()
	}

	/// Poller exit check: sweep, and if nobody is left flip to Idle under the same lock.
	///
	/// Returns true when the caller must exit.
	pub fn sweep_and_maybe_stop(&self) -> bool {
		self.sweep_and_maybe_stop_at(unix_now_secs())
	}

	pub fn sweep_and_maybe_stop_at(&self, now: i64) -> bool {
		let mut inner = self.inner.lock();
		self.sweep_locked(&mut inner, now);

		if inner.entries.is_empty() {
			inner.poller = PollerState::Idle;
			info!("no presence left, stopping relay poller");
			true
		} else {
			false
		}
	}

	/// Rooms named by any presence entry, stale or not.
	pub fn tracked_rooms(&self) -> HashSet<RoomKey> {
		self.inner.lock().entries.values().filter_map(|e| e.room.clone()).collect()
	}

	#[cfg(test)]
	pub fn get(&self, conn: ConnId) -> Option<PresenceEntry> {
		self.inner.lock().entries.get(&conn).cloned()
	}

	pub fn len(&self) -> usize {
		self.inner.lock().entries.len()
	}

	#[cfg(test)]
	pub fn is_empty(&self) -> bool {
		self.inner.lock().entries.is_empty()
	}

	pub fn is_poller_running(&self) -> bool {
		self.inner.lock().poller == PollerState::Running
	}

	fn sweep_locked(&self, inner: &mut Inner, now: i64) {
		let oldest = now - self.timeout_secs;
		let before = inner.entries.len();
		inner.entries.retain(|_, e| e.last_seen >= oldest);

		let removed = before - inner.entries.len();
		if removed > 0 {
			debug!(removed, remaining = inner.entries.len(), "presence: swept stale entries");
		}
	}
}
