#![forbid(unsafe_code)]

pub mod client;
pub mod frame;
pub mod server;

pub use client::{ClientMessage, LoginRequest};
pub use frame::{DEFAULT_MAX_FRAME_SIZE, ProtocolError, decode_client_frame, encode_server_event};
pub use server::{ChatLine, Drawing, MembershipChange, RenameNotice, RosterEntry, ServerEvent};

/// Protocol version constants.
pub mod version {
	/// Wire format major version: JSON `{"event", "data"}` text frames.
	pub const PROTOCOL_MAJOR: u32 = 1;
	pub const PROTOCOL_MINOR: u32 = 0;

	/// Compact representation useful for logs/metrics.
	pub const PROTOCOL_VERSION_U32: u32 = (PROTOCOL_MAJOR << 16) | PROTOCOL_MINOR;
}
