#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use streamchat_domain::{ConnId, RoomKey};

use crate::server::presence::PresenceTracker;

fn room(name: &str) -> RoomKey {
	RoomKey::new(name).unwrap()
}

fn counting_tracker() -> (PresenceTracker, Arc<AtomicUsize>) {
	let tracker = PresenceTracker::new(Duration::from_secs(30));
	let launches = Arc::new(AtomicUsize::new(0));
	let counter = launches.clone();
	assert!(tracker.attach_launcher(Box::new(move || {
		counter.fetch_add(1, Ordering::SeqCst);
	})));
	(tracker, launches)
}

#[test]
fn live_count_excludes_entries_older_than_timeout() {
	let tracker = PresenceTracker::new(Duration::from_secs(30));
	let now = 1_000;

	tracker.touch_at(ConnId(1), Some(room("alice")), now);
	tracker.touch_at(ConnId(2), Some(room("alice")), now - 30);
	tracker.touch_at(ConnId(3), Some(room("alice")), now - 31);
	tracker.touch_at(ConnId(4), Some(room("bob")), now);
	tracker.touch_at(ConnId(5), None, now);

	assert_eq!(tracker.live_viewer_count_at(&room("alice"), now), 2);
	assert_eq!(tracker.live_viewer_count_at(&room("bob"), now), 1);
	assert_eq!(tracker.live_viewer_count_at(&room("alice"), now + 1), 1);
}

#[test]
fn touch_refreshes_timestamp_and_room() {
	let tracker = PresenceTracker::new(Duration::from_secs(30));
	tracker.touch_at(ConnId(1), None, 100);
	tracker.touch_at(ConnId(1), Some(room("alice")), 150);

	let entry = tracker.get(ConnId(1)).unwrap();
	assert_eq!(entry.last_seen, 150);
	assert_eq!(entry.room, Some(room("alice")));
	assert_eq!(tracker.len(), 1);
}

#[test]
fn sweep_drops_stale_entries() {
	let tracker = PresenceTracker::new(Duration::from_secs(30));
	tracker.touch_at(ConnId(1), Some(room("alice")), 100);
	tracker.touch_at(ConnId(2), Some(room("alice")), 200);

	assert!(!tracker.sweep_stale_at(200));
	assert_eq!(tracker.len(), 1);
	assert!(tracker.get(ConnId(1)).is_none());

	assert!(tracker.sweep_stale_at(300));
	assert!(tracker.is_empty());
}

#[test]
fn remove_forgets_connection() {
	let tracker = PresenceTracker::new(Duration::from_secs(30));
	tracker.touch_at(ConnId(1), Some(room("alice")), 100);
	assert!(tracker.remove(ConnId(1)).is_some());
	assert!(tracker.remove(ConnId(1)).is_none());
	assert_eq!(tracker.live_viewer_count_at(&room("alice"), 100), 0);
}

#[test]
fn tracked_rooms_include_stale_entries() {
	let tracker = PresenceTracker::new(Duration::from_secs(30));
	tracker.touch_at(ConnId(1), Some(room("alice")), 0);
	tracker.touch_at(ConnId(2), None, 1_000);
	assert_eq!(tracker.tracked_rooms().into_iter().collect::<Vec<_>>(), vec![room("alice")]);
}

#[test]
fn launcher_runs_once_per_idle_to_running_transition() {
	let (tracker, launches) = counting_tracker();

	tracker.touch_at(ConnId(1), None, 100);
	tracker.touch_at(ConnId(2), None, 100);
	tracker.touch_at(ConnId(1), Some(room("alice")), 101);
	assert_eq!(launches.load(Ordering::SeqCst), 1);
	assert!(tracker.is_poller_running());

	assert!(!tracker.sweep_and_maybe_stop_at(120));
	assert!(tracker.is_poller_running());

	assert!(tracker.sweep_and_maybe_stop_at(500));
	assert!(!tracker.is_poller_running());

	tracker.touch_at(ConnId(3), None, 600);
	assert_eq!(launches.load(Ordering::SeqCst), 2);
}

#[test]
fn no_launcher_means_no_start() {
	let tracker = PresenceTracker::new(Duration::from_secs(30));
	tracker.touch_at(ConnId(1), None, 100);
	assert!(!tracker.is_poller_running());
}

#[test]
fn launcher_attaches_once() {
	let (tracker, _) = counting_tracker();
	assert!(!tracker.attach_launcher(Box::new(|| {})));
}

#[test]
fn concurrent_touches_start_a_single_poller() {
	let (tracker, launches) = counting_tracker();
	let tracker = Arc::new(tracker);

	let handles: Vec<_> = (0..8)
		.map(|i| {
			let tracker = tracker.clone();
			std::thread::spawn(move || tracker.touch_at(ConnId(i), Some(room("alice")), 100))
		})
		.collect();
	for handle in handles {
		handle.join().unwrap();
	}

	assert_eq!(launches.load(Ordering::SeqCst), 1);
	assert_eq!(tracker.len(), 8);
}
