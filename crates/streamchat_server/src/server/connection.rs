#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use futures::{SinkExt as _, StreamExt as _};
use streamchat_domain::ConnId;
use streamchat_protocol::{ClientMessage, DEFAULT_MAX_FRAME_SIZE, ProtocolError, ServerEvent, decode_client_frame, encode_server_event};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::ServerSettings;
use crate::server::dispatch::ChatDispatcher;

/// Per-connection server settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub max_frame_bytes: usize,

	pub message_rate_limit_burst: u32,
	pub message_rate_limit_per_minute: u32,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			message_rate_limit_burst: 0,
			message_rate_limit_per_minute: 0,
		}
	}
}

impl ConnectionSettings {
	pub fn from_server(settings: &ServerSettings) -> Self {
		Self {
			max_frame_bytes: settings.max_frame_bytes,
			message_rate_limit_burst: settings.message_rate_limit_burst,
			message_rate_limit_per_minute: settings.message_rate_limit_per_minute,
		}
	}
}

#[derive(Debug)]
struct TokenBucket {
	capacity: f64,
	tokens: f64,
	refill_per_sec: f64,
	last: Instant,
}

impl TokenBucket {
	fn new(capacity: u32, refill_per_minute: u32) -> Option<Self> {
		if capacity == 0 || refill_per_minute == 0 {
			return None;
		}
		Some(Self {
			capacity: capacity as f64,
			tokens: capacity as f64,
			refill_per_sec: refill_per_minute as f64 / 60.0,
			last: Instant::now(),
		})
	}

	fn allow(&mut self) -> bool {
		let now = Instant::now();
		let elapsed = now.duration_since(self.last).as_secs_f64();
		if elapsed > 0.0 {
			self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
			self.last = now;
		}
		if self.tokens >= 1.0 {
			self.tokens -= 1.0;
			true
		} else {
			false
		}
	}
}

pub async fn handle_connection(
	conn: ConnId,
	stream: TcpStream,
	remote: SocketAddr,
	dispatcher: ChatDispatcher,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("streamchat_server_active_connections").decrement(1.0);
		}
	}

	let ws = tokio_tungstenite::accept_async(stream)
		.await
		.context("websocket handshake")?;

	metrics::gauge!("streamchat_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	info!(conn_id = %conn, %remote, "connection opened");

	let (mut sink, mut source) = ws.split();
	let mut outbound = dispatcher.state().hub.register(conn);
	dispatcher.on_connect(conn);

	let writer = tokio::spawn(async move {
		while let Some(event) = outbound.recv().await {
			let text = match encode_server_event(&event) {
				Ok(text) => text,
				Err(e) => {
					warn!(conn_id = %conn, event = event.event_name(), error = %e, "failed to encode event");
					continue;
				}
			};
			if sink.send(Message::Text(text.into())).await.is_err() {
				break;
			}
			metrics::counter!("streamchat_server_events_out_total").increment(1);
		}
		let _ = sink.close().await;
	});

	let remote_addr = remote.ip().to_string();
	let mut limiter = TokenBucket::new(settings.message_rate_limit_burst, settings.message_rate_limit_per_minute);

	while let Some(frame) = source.next().await {
		let frame = match frame {
			Ok(frame) => frame,
			Err(e) => {
				debug!(conn_id = %conn, error = %e, "websocket read failed");
				break;
			}
		};

		match frame {
			Message::Text(text) => {
				metrics::counter!("streamchat_server_frames_in_total").increment(1);
				handle_text(conn, &remote_addr, text.as_str(), &dispatcher, &settings, &mut limiter).await;
			}
			Message::Close(_) => break,
			Message::Binary(_) => {
				debug!(conn_id = %conn, "ignoring binary frame");
			}
			Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
		}
	}

	dispatcher.on_disconnect(conn);
	if tokio::time::timeout(Duration::from_secs(5), writer).await.is_err() {
		warn!(conn_id = %conn, "writer did not finish in time");
	}

	info!(conn_id = %conn, "connection closed");
	Ok(())
}

async fn handle_text(
	conn: ConnId,
	remote_addr: &str,
	text: &str,
	dispatcher: &ChatDispatcher,
	settings: &ConnectionSettings,
	limiter: &mut Option<TokenBucket>,
) {
	let hub = &dispatcher.state().hub;

	let msg = match decode_client_frame(text, settings.max_frame_bytes) {
		Ok(msg) => msg,
		Err(ProtocolError::UnknownEvent(event)) => {
			debug!(conn_id = %conn, %event, "ignoring unknown event");
			return;
		}
		Err(e) => {
			metrics::counter!("streamchat_server_decode_errors_total").increment(1);
			debug!(conn_id = %conn, error = %e, "bad client frame");
			hub.emit_to_connection(conn, ServerEvent::error(e.to_string()));
			return;
		}
	};

	let rate_limited = matches!(msg, ClientMessage::Message { .. } | ClientMessage::Drawing { .. });
	if rate_limited && let Some(bucket) = limiter.as_mut() && !bucket.allow() {
		metrics::counter!("streamchat_server_rate_limited_total").increment(1);
		hub.emit_to_connection(conn, ServerEvent::warning("You are sending messages too quickly"));
		return;
	}

	match msg {
		ClientMessage::Presence { streamer } => dispatcher.on_presence(conn, streamer.as_deref()),
		ClientMessage::Login(req) => dispatcher.on_login(conn, remote_addr, &req).await,
		ClientMessage::Message { message } => dispatcher.on_message(conn, &message).await,
		ClientMessage::GetColor => dispatcher.on_get_color(conn),
		ClientMessage::Drawing { src } => dispatcher.on_drawing(conn, &src),
	}
}
