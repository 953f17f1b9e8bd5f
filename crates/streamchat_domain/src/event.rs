#![forbid(unsafe_code)]

use serde_json::{Map, Value, json};

use crate::RoomKey;

/// Append-only analytics record of something that happened in a room.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
	/// Unix seconds.
	pub timestamp: i64,
	pub room: RoomKey,
	pub kind: EventKind,
}

impl DomainEvent {
	pub fn new(timestamp: i64, room: RoomKey, kind: EventKind) -> Self {
		Self { timestamp, room, kind }
	}

	pub fn type_name(&self) -> &'static str {
		self.kind.type_name()
	}

	/// Variant payload as stored in the `meta` column.
	pub fn meta(&self) -> Value {
		self.kind.meta()
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
	StartStreaming { description: String, password: Option<String> },
	StopStreaming,
	JoinChat { name: String },
	LeaveChat { name: String },
	ChangeName { old_name: String, new_name: String },
	SendMessage { name: String, message: String },
	SendDrawing { name: String, drawing: String },
	SendAction { name: String, action: String },
	SendBroadcast { broadcast: String },
	ViewerCount { count: usize },
	ModUser { name: String },
	DemodUser { name: String },
	MuteUser { name: String },
	UnmuteUser { name: String },
	SetDescription { description: String },
	SetViewerPassword { password: Option<String> },
}

impl EventKind {
	/// Stable identifier written to the `type` column.
	pub const fn type_name(&self) -> &'static str {
		match self {
			EventKind::StartStreaming { .. } => "start_streaming",
			EventKind::StopStreaming => "stop_streaming",
			EventKind::JoinChat { .. } => "join_chat",
			EventKind::LeaveChat { .. } => "leave_chat",
			EventKind::ChangeName { .. } => "change_name",
			EventKind::SendMessage { .. } => "send_message",
			EventKind::SendDrawing { .. } => "send_drawing",
			EventKind::SendAction { .. } => "send_action",
			EventKind::SendBroadcast { .. } => "send_broadcast",
			EventKind::ViewerCount { .. } => "viewer_count",
			EventKind::ModUser { .. } => "mod_user",
			EventKind::DemodUser { .. } => "demod_user",
			EventKind::MuteUser { .. } => "mute_user",
			EventKind::UnmuteUser { .. } => "unmute_user",
			EventKind::SetDescription { .. } => "set_description",
			EventKind::SetViewerPassword { .. } => "set_viewer_password",
		}
	}

	pub fn meta(&self) -> Value {
		match self {
			EventKind::StartStreaming { description, password } => json!({
				"description": description,
				"password": password,
			}),
			EventKind::StopStreaming => Value::Object(Map::new()),
			EventKind::JoinChat { name }
			| EventKind::LeaveChat { name }
			| EventKind::ModUser { name }
			| EventKind::DemodUser { name }
			| EventKind::MuteUser { name }
			| EventKind::UnmuteUser { name } => json!({ "name": name }),
			EventKind::ChangeName { old_name, new_name } => json!({ "oldname": old_name, "newname": new_name }),
			EventKind::SendMessage { name, message } => json!({ "name": name, "message": message }),
			EventKind::SendDrawing { name, drawing } => json!({ "name": name, "drawing": drawing }),
			EventKind::SendAction { name, action } => json!({ "name": name, "action": action }),
			EventKind::SendBroadcast { broadcast } => json!({ "broadcast": broadcast }),
			EventKind::ViewerCount { count } => json!({ "count": count }),
			EventKind::SetDescription { description } => json!({ "description": description }),
			EventKind::SetViewerPassword { password } => json!({ "password": password }),
		}
	}
}
