#![forbid(unsafe_code)]

use streamchat_domain::{ConnId, EventKind, Role, RoomKey};
use streamchat_protocol::{ChatLine, ServerEvent};

use crate::server::drawing::{image_data_url, png_data_url};
use crate::server::test_support::{ALICE_KEY, TestHarness, drain, notices};

fn alice() -> RoomKey {
	RoomKey::new("alice").unwrap()
}

fn usernames(users: &[streamchat_protocol::RosterEntry]) -> Vec<&str> {
	let mut names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
	names.sort_unstable();
	names
}

#[tokio::test]
async fn scenario_admin_and_viewer_join() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	let (c2, mut rx2) = h.connect(2);

	h.login(c1, "alice", "alice", Some(ALICE_KEY)).await;
	let events = drain(&mut rx1);
	assert_eq!(
		events[0],
		ServerEvent::LoginSuccess {
			username: "Alice".into()
		}
	);
	assert!(matches!(&events[1], ServerEvent::Connected(c) if c.kind == Role::Admin));
	assert_eq!(notices(&events), vec!["You have admin rights."]);

	h.login(c2, "bob", "alice", None).await;
	drain(&mut rx2);
	let events = drain(&mut rx1);
	let ServerEvent::Connected(joined) = &events[0] else {
		panic!("expected connected, got {events:?}");
	};
	assert_eq!(joined.username, "bob");
	assert_eq!(joined.kind, Role::Normal);
	assert_eq!(usernames(&joined.users), vec!["Alice", "bob"]);

	let before = h.state.registry.roster_of(&alice());
	h.dispatcher.on_message(c2, "/mute alice").await;
	assert_eq!(notices(&drain(&mut rx2)), vec!["Unrecognized command '/mute', use '/help' for info."]);
	assert!(drain(&mut rx1).is_empty());
	assert_eq!(h.state.registry.roster_of(&alice()), before);
	assert!(!h.state.registry.get(c1).unwrap().muted);

	let logged = h.logged_events(2).await;
	assert!(logged.iter().all(|e| matches!(e.kind, EventKind::JoinChat { .. })));
}

#[tokio::test]
async fn moderator_cannot_mute_admin() {
	let h = TestHarness::new();
	let (c1, _rx1) = h.connect(1);
	let (c2, mut rx2) = h.connect(2);
	h.login(c1, "alice", "alice", Some(ALICE_KEY)).await;
	h.login(c2, "bob", "alice", None).await;
	h.dispatcher.on_message(c1, "/mod bob").await;
	drain(&mut rx2);

	h.dispatcher.on_message(c2, "/mute Alice").await;
	assert_eq!(notices(&drain(&mut rx2)), vec!["User 'alice' cannot be muted."]);
	assert!(!h.state.registry.get(c1).unwrap().muted);
}

#[tokio::test]
async fn moderation_commands_update_the_registry() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	let (c2, mut rx2) = h.connect(2);
	h.login(c1, "alice", "alice", Some(ALICE_KEY)).await;
	h.login(c2, "bob", "alice", None).await;
	drain(&mut rx1);
	drain(&mut rx2);

	h.dispatcher.on_message(c1, "/mod bob").await;
	assert_eq!(notices(&drain(&mut rx1)), vec!["User 'bob' has been promoted to moderator."]);
	assert_eq!(notices(&drain(&mut rx2)), vec!["You have been promoted to moderator."]);
	assert_eq!(h.state.registry.get(c2).unwrap().role, Role::Moderator);

	h.dispatcher.on_message(c1, "/mute bob").await;
	h.dispatcher.on_message(c1, "/unmute bob").await;
	assert_eq!(
		notices(&drain(&mut rx1)),
		vec!["User 'bob' has been muted.", "User 'bob' has been unmuted."]
	);
	assert!(!h.state.registry.get(c2).unwrap().muted);

	h.dispatcher.on_message(c1, "/unmod bob").await;
	assert_eq!(notices(&drain(&mut rx1)), vec!["User 'bob' has been demoted from moderator."]);
	assert_eq!(h.state.registry.get(c2).unwrap().role, Role::Normal);

	h.dispatcher.on_message(c1, "/demod bob").await;
	assert_eq!(notices(&drain(&mut rx1)), vec!["User 'bob' is not a moderator."]);
}

#[tokio::test]
async fn scenario_mute_silences_viewer() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	let (c2, mut rx2) = h.connect(2);
	h.login(c1, "alice", "alice", Some(ALICE_KEY)).await;
	h.login(c2, "bob", "alice", None).await;
	drain(&mut rx1);
	drain(&mut rx2);

	h.dispatcher.on_message(c2, "hello").await;
	let expected = ServerEvent::MessageReceived(ChatLine {
		username: "bob".into(),
		kind: Role::Normal,
		color: "#000000".into(),
		message: "hello".into(),
	});
	assert_eq!(drain(&mut rx1), vec![expected.clone()]);
	assert_eq!(drain(&mut rx2), vec![expected]);

	h.dispatcher.on_message(c1, "/mute bob").await;
	assert_eq!(notices(&drain(&mut rx1)), vec!["User 'bob' has been muted."]);
	assert_eq!(notices(&drain(&mut rx2)), vec!["You have been muted."]);

	h.dispatcher.on_message(c2, "hi").await;
	assert!(drain(&mut rx1).is_empty());
	assert_eq!(drain(&mut rx2), vec![ServerEvent::server("You are muted!")]);
}

#[tokio::test]
async fn muting_twice_notifies_only_the_issuer() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	let (c2, mut rx2) = h.connect(2);
	h.login(c1, "alice", "alice", Some(ALICE_KEY)).await;
	h.login(c2, "bob", "alice", None).await;

	h.dispatcher.on_message(c1, "/mute bob").await;
	drain(&mut rx1);
	drain(&mut rx2);

	h.dispatcher.on_message(c1, "/quiet BOB").await;
	assert_eq!(drain(&mut rx1), vec![ServerEvent::server("User 'bob' is already muted.")]);
	assert!(drain(&mut rx2).is_empty());
	assert!(h.state.registry.get(c2).unwrap().muted);

	let logged = h.logged_events(3).await;
	let mutes = logged
		.iter()
		.filter(|e| matches!(e.kind, EventKind::MuteUser { .. }))
		.count();
	assert_eq!(mutes, 1);
}

#[tokio::test]
async fn muted_users_keep_informational_commands() {
	let h = TestHarness::new();
	let (c1, _rx1) = h.connect(1);
	let (c2, mut rx2) = h.connect(2);
	h.login(c1, "alice", "alice", Some(ALICE_KEY)).await;
	h.login(c2, "bob", "alice", None).await;
	h.dispatcher.on_message(c1, "/mute bob").await;
	drain(&mut rx2);

	for line in ["/me waves", "/color red", "/name rob"] {
		h.dispatcher.on_message(c2, line).await;
		assert_eq!(drain(&mut rx2), vec![ServerEvent::server("You are muted!")], "{line}");
	}

	h.dispatcher.on_message(c2, "/users").await;
	assert!(matches!(drain(&mut rx2).as_slice(), [ServerEvent::Userlist { users }] if users.len() == 2));
}

#[tokio::test]
async fn scenario_rename_to_taken_name() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	let (c2, _rx2) = h.connect(2);
	let (c3, _rx3) = h.connect(3);
	h.login(c1, "alice", "alice", Some(ALICE_KEY)).await;
	h.login(c2, "bob", "alice", None).await;
	h.login(c3, "dave", "alice", None).await;
	drain(&mut rx1);

	h.dispatcher.on_message(c1, "/rename bob dave").await;
	assert_eq!(
		notices(&drain(&mut rx1)),
		vec!["Name has already been taken, try a different name."]
	);
	assert_eq!(h.state.registry.get(c2).unwrap().display_name, "bob");
}

#[tokio::test]
async fn rename_other_broadcasts_roster() {
	let h = TestHarness::new();
	let (c1, _rx1) = h.connect(1);
	let (c2, mut rx2) = h.connect(2);
	h.login(c1, "alice", "alice", Some(ALICE_KEY)).await;
	h.login(c2, "bob", "alice", None).await;
	drain(&mut rx2);

	h.dispatcher.on_message(c1, "/rename bob carol").await;
	let events = drain(&mut rx2);
	let [ServerEvent::Rename(notice)] = events.as_slice() else {
		panic!("expected rename, got {events:?}");
	};
	assert_eq!(notice.oldname, "bob");
	assert_eq!(notice.newname, "carol");
	assert_eq!(usernames(&notice.users), vec!["Alice", "carol"]);
}

#[tokio::test]
async fn rename_self_logs_change() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	h.login(c1, "bob", "alice", None).await;
	drain(&mut rx1);

	h.dispatcher.on_message(c1, "/nick robert").await;
	assert!(matches!(drain(&mut rx1).as_slice(), [ServerEvent::Rename(n)] if n.newname == "robert"));

	h.dispatcher.on_message(c1, "/name").await;
	assert_eq!(notices(&drain(&mut rx1)), vec!["Invalid name specified, try a different name."]);

	let logged = h.logged_events(2).await;
	assert!(logged.iter().any(|e| e.kind
		== EventKind::ChangeName {
			old_name: "bob".into(),
			new_name: "robert".into()
		}));
}

#[tokio::test]
async fn color_command_updates_and_echoes() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	h.login(c1, "bob", "alice", None).await;
	drain(&mut rx1);

	h.dispatcher.on_message(c1, "/color Red").await;
	let events = drain(&mut rx1);
	assert!(matches!(&events[0], ServerEvent::ActionReceived(l) if l.message == "changed their color!" && l.color == "#ff0000"));
	assert_eq!(
		events[1],
		ServerEvent::ReturnColor {
			color: "#ff0000".into()
		}
	);

	h.dispatcher.on_message(c1, "/setcolor #zzzzzz").await;
	assert_eq!(
		notices(&drain(&mut rx1)),
		vec!["Invalid color #zzzzzz specified, try a color name, an HTML color like #ff00ff or \"random\" for a random color."]
	);

	h.dispatcher.on_get_color(c1);
	assert_eq!(
		drain(&mut rx1),
		vec![ServerEvent::ReturnColor {
			color: "#ff0000".into()
		}]
	);
}

#[tokio::test]
async fn gated_commands_look_unknown_to_viewers() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	h.login(c1, "bob", "alice", None).await;
	drain(&mut rx1);

	for cmd in ["/settings", "/mute x", "/unmute x", "/mod x", "/demod x", "/rename x y", "/desc x", "/password x", "/dance"] {
		h.dispatcher.on_message(c1, cmd).await;
		let token = cmd.split(' ').next().unwrap();
		assert_eq!(
			notices(&drain(&mut rx1)),
			vec![format!("Unrecognized command '{token}', use '/help' for info.")]
		);
	}
}

#[tokio::test]
async fn help_lists_depend_on_role() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	let (c2, mut rx2) = h.connect(2);
	h.login(c1, "alice", "alice", Some(ALICE_KEY)).await;
	h.login(c2, "bob", "alice", None).await;
	drain(&mut rx1);
	drain(&mut rx2);

	h.dispatcher.on_message(c1, "/help").await;
	h.dispatcher.on_message(c2, "/help").await;
	assert_eq!(notices(&drain(&mut rx1)).len(), 14);
	assert_eq!(notices(&drain(&mut rx2)).len(), 6);
}

#[tokio::test]
async fn admin_settings_description_and_password() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	let (c2, mut rx2) = h.connect(2);
	h.login(c1, "alice", "alice", Some(ALICE_KEY)).await;
	h.login(c2, "bob", "alice", None).await;
	drain(&mut rx1);
	drain(&mut rx2);

	h.dispatcher.on_message(c1, "/settings").await;
	assert_eq!(notices(&drain(&mut rx1)), vec!["No stream description", "No stream password"]);

	h.dispatcher.on_message(c1, "/description late night :fire:").await;
	assert_eq!(notices(&drain(&mut rx1)), vec!["Stream description updated!"]);
	let profile = h.store.profile(&alice()).unwrap();
	assert_eq!(profile.description.as_deref(), Some("late night \u{1F525}"));

	h.dispatcher.on_message(c1, "/password hunter2").await;
	let events = drain(&mut rx1);
	assert_eq!(notices(&events), vec!["Stream password set to \"hunter2\"!"]);
	assert!(events.contains(&ServerEvent::PasswordSet {
		password: "hunter2".into()
	}));
	assert_eq!(
		drain(&mut rx2),
		vec![ServerEvent::PasswordActivated {
			username: "alice".into()
		}]
	);
	assert_eq!(h.store.profile(&alice()).unwrap().viewer_password.as_deref(), Some("hunter2"));

	h.dispatcher.on_message(c1, "/password").await;
	assert_eq!(notices(&drain(&mut rx1)), vec!["Stream password removed!"]);
	assert_eq!(
		drain(&mut rx2),
		vec![ServerEvent::PasswordDeactivated {
			username: "alice".into(),
			msg: "Stream password has been removed.".into()
		}]
	);
	assert_eq!(h.store.profile(&alice()).unwrap().viewer_password, None);

	h.dispatcher.on_message(c1, "/settings").await;
	assert_eq!(
		notices(&drain(&mut rx1)),
		vec!["Description: late night \u{1F525}", "No stream password"]
	);
}

#[tokio::test]
async fn store_failure_in_command_is_reported() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	h.login(c1, "alice", "alice", Some(ALICE_KEY)).await;
	drain(&mut rx1);

	h.store.set_unavailable(true);
	h.dispatcher.on_message(c1, "/desc hello").await;
	assert_eq!(notices(&drain(&mut rx1)), vec!["Error updating settings!"]);
	h.dispatcher.on_message(c1, "/settings").await;
	assert_eq!(notices(&drain(&mut rx1)), vec!["Error looking up settings!"]);
}

#[tokio::test]
async fn unauthenticated_and_blank_messages() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);

	h.dispatcher.on_message(c1, "hello").await;
	assert_eq!(drain(&mut rx1), vec![ServerEvent::error("User is not authenticated?")]);
	h.dispatcher.on_get_color(c1);
	assert_eq!(drain(&mut rx1), vec![ServerEvent::error("User is not authenticated?")]);

	h.login(c1, "bob", "alice", None).await;
	drain(&mut rx1);
	h.dispatcher.on_message(c1, "   ").await;
	assert_eq!(drain(&mut rx1), vec![ServerEvent::warning("Message cannot be blank")]);
}

#[tokio::test]
async fn login_errors_are_scoped_to_sender() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	let (c2, mut rx2) = h.connect(2);
	h.login(c1, "bob", "alice", None).await;
	drain(&mut rx1);

	h.login(c2, "BOB", "alice", None).await;
	assert_eq!(drain(&mut rx2), vec![ServerEvent::error("Username is already taken")]);

	h.login(c2, "alice", "alice", None).await;
	assert_eq!(
		drain(&mut rx2),
		vec![ServerEvent::LoginKeyRequired {
			username: "Alice".into()
		}]
	);
	assert!(drain(&mut rx1).is_empty());
	assert_eq!(h.state.registry.roster_of(&alice()).len(), 1);
}

#[tokio::test]
async fn drawings_are_validated() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	h.login(c1, "bob", "alice", None).await;
	drain(&mut rx1);

	h.dispatcher.on_drawing(c1, &png_data_url(100, 100));
	assert_eq!(notices(&drain(&mut rx1)), vec!["Invalid drawing received!"]);

	let src = png_data_url(230, 120);
	h.dispatcher.on_drawing(c1, &src);
	assert!(matches!(drain(&mut rx1).as_slice(), [ServerEvent::DrawingReceived(d)] if d.src == src));
}

#[tokio::test]
async fn gif_drawings_are_broadcast() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	h.login(c1, "bob", "alice", None).await;
	drain(&mut rx1);

	let src = image_data_url(230, 120, image::ImageFormat::Gif);
	h.dispatcher.on_drawing(c1, &src);
	assert!(matches!(drain(&mut rx1).as_slice(), [ServerEvent::DrawingReceived(d)] if d.src == src));
}

#[tokio::test]
async fn disconnect_broadcasts_and_logs() {
	let h = TestHarness::new();
	let (c1, mut rx1) = h.connect(1);
	let (c2, _rx2) = h.connect(2);
	h.login(c1, "alice", "alice", Some(ALICE_KEY)).await;
	h.login(c2, "bob", "alice", None).await;
	drain(&mut rx1);

	h.dispatcher.on_disconnect(c2);
	assert!(h.state.registry.get(c2).is_none());
	assert!(h.state.presence.get(c2).is_none());

	let events = drain(&mut rx1);
	let [ServerEvent::Disconnected(left)] = events.as_slice() else {
		panic!("expected disconnected, got {events:?}");
	};
	assert_eq!(left.username, "bob");
	assert_eq!(usernames(&left.users), vec!["Alice"]);

	let logged = h.logged_events(3).await;
	assert!(logged.iter().any(|e| e.kind == EventKind::LeaveChat { name: "bob".into() }));

	// The name is free again right away.
	let (c3, mut rx3) = h.connect(3);
	h.login(c3, "bob", "alice", None).await;
	assert!(matches!(drain(&mut rx3).first(), Some(ServerEvent::LoginSuccess { .. })));
	assert_eq!(h.state.registry.get(ConnId(3)).unwrap().display_name, "bob");
}

#[tokio::test]
async fn messages_refresh_presence() {
	let h = TestHarness::new();
	let (c1, _rx1) = h.connect(1);
	assert_eq!(h.state.presence.get(c1).unwrap().room, None);

	h.dispatcher.on_presence(c1, Some("Alice"));
	assert_eq!(h.state.presence.get(c1).unwrap().room, Some(alice()));
	h.dispatcher.on_presence(c1, None);
	assert_eq!(h.state.presence.get(c1).unwrap().room, Some(alice()));
	assert_eq!(h.state.presence.live_viewer_count(&alice()), 1);
}
