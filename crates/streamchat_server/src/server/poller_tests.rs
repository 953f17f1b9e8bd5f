#![forbid(unsafe_code)]

use std::time::Duration;

use streamchat_domain::{ConnId, EmoteCatalogEntry, EventKind, RgbColor, Role};
use streamchat_protocol::{ChatLine, ServerEvent};

use crate::config::ChatSettings;
use crate::server::poller::RelayPoller;
use crate::server::test_support::{ALICE_KEY, TestHarness, drain};

fn poller(h: &TestHarness) -> RelayPoller {
	RelayPoller::new(h.state.clone(), &ChatSettings::default())
}

fn emote(alias: &str) -> EmoteCatalogEntry {
	EmoteCatalogEntry {
		alias: alias.to_string(),
		uri: format!("/emotes/{alias}.png"),
	}
}

#[tokio::test]
async fn scenario_relays_server_message_to_occupied_room() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	h.login(c1, "bob", "alice", None).await;
	drain(&mut rx1);

	h.store.queue_pending("alice", "server", "raid incoming");
	poller(&h).tick().await;

	assert_eq!(drain(&mut rx1), vec![ServerEvent::server("raid incoming")]);
	assert!(h.store.pending().is_empty());

	let logged = h.logged_events(2).await;
	assert!(logged.iter().any(|e| e.kind
		== EventKind::SendBroadcast {
			broadcast: "raid incoming".into()
		}));
}

#[tokio::test]
async fn scenario_leaves_messages_for_empty_rooms_queued() {
	let h = TestHarness::new();
	h.store.add_streamer("carol", "k").unwrap();
	let (c1, mut rx1) = h.connect(1);
	h.login(c1, "bob", "carol", None).await;
	drain(&mut rx1);

	let id = h.store.queue_pending("alice", "server", "raid incoming");
	poller(&h).tick().await;

	assert!(drain(&mut rx1).is_empty());
	assert_eq!(h.store.pending().iter().map(|m| m.id).collect::<Vec<_>>(), vec![id]);
}

#[tokio::test]
async fn chat_messages_speak_as_the_streamer() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	h.login(c1, "alice", "alice", Some(ALICE_KEY)).await;
	h.state.registry.set_color(c1, RgbColor::new(0x00ff00).unwrap());
	drain(&mut rx1);

	h.store.queue_pending("Alice", "action", "waves :wave:");
	h.store.queue_pending("alice", "normal", "hello");
	poller(&h).tick().await;

	assert_eq!(
		drain(&mut rx1),
		vec![
			ServerEvent::ActionReceived(ChatLine {
				username: "Alice".into(),
				kind: Role::Admin,
				color: "#00ff00".into(),
				message: "waves \u{1F44B}".into(),
			}),
			ServerEvent::MessageReceived(ChatLine {
				username: "Alice".into(),
				kind: Role::Admin,
				color: "#00ff00".into(),
				message: "hello".into(),
			}),
		]
	);
}

#[tokio::test]
async fn chat_messages_fall_back_to_room_key_without_admin() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	h.login(c1, "bob", "alice", None).await;
	drain(&mut rx1);

	h.store.queue_pending("Alice", "normal", "brb");
	poller(&h).tick().await;

	assert_eq!(
		drain(&mut rx1),
		vec![ServerEvent::MessageReceived(ChatLine {
			username: "alice".into(),
			kind: Role::Admin,
			color: "#000000".into(),
			message: "brb".into(),
		})]
	);
}

#[tokio::test]
async fn unknown_pending_types_are_dropped() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	h.login(c1, "bob", "alice", None).await;
	drain(&mut rx1);

	h.store.queue_pending("alice", "shout", "HEY");
	poller(&h).tick().await;

	assert!(drain(&mut rx1).is_empty());
	assert!(h.store.pending().is_empty());
}

#[tokio::test]
async fn viewer_counts_are_logged_on_change_only() {
	let h = TestHarness::new();
	let mut poller = poller(&h);

	h.dispatcher.on_presence(ConnId(1), Some("alice"));
	h.dispatcher.on_presence(ConnId(2), Some("nobody"));
	poller.tick().await;
	poller.tick().await;
	h.dispatcher.on_presence(ConnId(3), Some("alice"));
	poller.tick().await;

	let logged = h.logged_events(2).await;
	let counts: Vec<(String, usize)> = logged
		.iter()
		.filter_map(|e| match e.kind {
			EventKind::ViewerCount { count } => Some((e.room.to_string(), count)),
			_ => None,
		})
		.collect();
	assert_eq!(counts, vec![("alice".to_string(), 1), ("alice".to_string(), 2)]);
}

#[tokio::test]
async fn emote_changes_reach_every_connection() {
	let h = TestHarness::new();
	h.state.emotes.seed_catalog(vec![emote("old")]);
	let (_c1, mut rx1) = h.connect(1);
	let (c2, mut rx2) = h.connect(2);
	h.login(c2, "bob", "alice", None).await;
	drain(&mut rx2);

	h.store.set_emotes(vec![emote("new")]);
	poller(&h).tick().await;

	let expected = vec![
		ServerEvent::AddEmote {
			key: ":new:".into(),
			uri: "/emotes/new.png".into(),
		},
		ServerEvent::RemoveEmote { key: ":old:".into() },
	];
	assert_eq!(drain(&mut rx1), expected);
	assert_eq!(drain(&mut rx2), expected);
}

#[tokio::test]
async fn emote_catalog_refreshes_on_its_own_schedule() {
	let h = TestHarness::new();
	let (_c1, mut rx1) = h.connect(1);
	let mut poller = poller(&h);

	poller.tick().await;
	h.store.set_emotes(vec![emote("pog")]);
	poller.tick().await;
	assert!(drain(&mut rx1).is_empty());
	assert_eq!(h.state.emotes.catalog_len(), 0);
}

#[tokio::test]
async fn store_outage_is_retried_next_tick() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	h.login(c1, "bob", "alice", None).await;
	drain(&mut rx1);
	h.store.queue_pending("alice", "server", "later");

	let mut poller = poller(&h);
	h.store.set_unavailable(true);
	poller.tick().await;
	assert!(drain(&mut rx1).is_empty());

	h.store.set_unavailable(false);
	poller.tick().await;
	assert_eq!(drain(&mut rx1), vec![ServerEvent::server("later")]);
	assert!(h.store.pending().is_empty());
}

#[tokio::test]
async fn run_exits_once_presence_is_empty() {
	let h = TestHarness::new();
	let poller = poller(&h);
	tokio::time::timeout(Duration::from_secs(1), poller.run())
		.await
		.expect("poller should stop with no presence");
	assert!(!h.state.presence.is_poller_running());
}
