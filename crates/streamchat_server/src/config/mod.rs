#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use streamchat_protocol::DEFAULT_MAX_FRAME_SIZE;
use tracing::{info, warn};

/// Default config path: `~/.streamchat/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".streamchat").join("config.toml"))
}

/// Load the server config from TOML at `path`, then apply env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub persistence: PersistenceSettings,
	pub chat: ChatSettings,
	/// Streamers seeded into the in-memory directory when no database is configured.
	pub dev_streamers: Vec<DevStreamer>,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self::from_file(FileConfig::default())
	}
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// WebSocket listen address (host:port); `--bind` wins over this.
	pub bind: Option<String>,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	pub max_frame_bytes: usize,
	/// Per-connection outbound queue; events beyond it are dropped.
	pub outbound_queue_capacity: usize,
	/// Chat/drawing rate limiting: per-connection burst size (0 disables).
	pub message_rate_limit_burst: u32,
	/// Chat/drawing rate limiting: per-connection refill per minute (0 disables).
	pub message_rate_limit_per_minute: u32,
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// `sqlite:`, `postgres:` or `mysql:` URL. Unset means in-memory dev mode.
	pub database_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
	/// Presence entries older than this are stale.
	pub presence_timeout: Duration,
	pub poll_interval: Duration,
	pub emote_refresh: Duration,
	/// Longest allowed display name, emotes counting as one.
	pub max_name_length: usize,
}

impl Default for ChatSettings {
	fn default() -> Self {
		Self {
			presence_timeout: Duration::from_secs(30),
			poll_interval: Duration::from_millis(1000),
			emote_refresh: Duration::from_secs(5),
			max_name_length: 20,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevStreamer {
	pub username: String,
	pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,

	#[serde(default)]
	chat: FileChatSettings,

	#[serde(default)]
	dev_streamers: Vec<FileDevStreamer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	bind: Option<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	max_frame_bytes: Option<usize>,
	outbound_queue_capacity: Option<usize>,
	message_rate_limit_burst: Option<u32>,
	message_rate_limit_per_minute: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileChatSettings {
	presence_timeout_secs: Option<u64>,
	poll_interval_ms: Option<u64>,
	emote_refresh_secs: Option<u64>,
	max_name_length: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
struct FileDevStreamer {
	username: String,
	key: String,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let chat_defaults = ChatSettings::default();

		let dev_streamers = file
			.dev_streamers
			.into_iter()
			.filter_map(|s| {
				let username = s.username.trim().to_string();
				if username.is_empty() || s.key.trim().is_empty() {
					warn!("config: skipping dev streamer with empty username or key");
					return None;
				}
				Some(DevStreamer { username, key: s.key })
			})
			.collect();

		Self {
			server: ServerSettings {
				bind: file.server.bind.filter(|s| !s.trim().is_empty()),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
				max_frame_bytes: file
					.server
					.max_frame_bytes
					.filter(|v| *v > 0)
					.unwrap_or(DEFAULT_MAX_FRAME_SIZE),
				outbound_queue_capacity: file.server.outbound_queue_capacity.filter(|v| *v > 0).unwrap_or(256),
				message_rate_limit_burst: file.server.message_rate_limit_burst.unwrap_or(10),
				message_rate_limit_per_minute: file.server.message_rate_limit_per_minute.unwrap_or(120),
			},
			persistence: PersistenceSettings {
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
			chat: ChatSettings {
				presence_timeout: file
					.chat
					.presence_timeout_secs
					.filter(|v| *v > 0)
					.map(Duration::from_secs)
					.unwrap_or(chat_defaults.presence_timeout),
				poll_interval: file
					.chat
					.poll_interval_ms
					.filter(|v| *v > 0)
					.map(Duration::from_millis)
					.unwrap_or(chat_defaults.poll_interval),
				emote_refresh: file
					.chat
					.emote_refresh_secs
					.map(Duration::from_secs)
					.unwrap_or(chat_defaults.emote_refresh),
				max_name_length: file
					.chat
					.max_name_length
					.filter(|v| *v > 0)
					.unwrap_or(chat_defaults.max_name_length),
			},
			dev_streamers,
		}
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => parse_toml(&s).map(Some),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn parse_toml(s: &str) -> anyhow::Result<FileConfig> {
	toml::from_str(s).context("parse TOML")
}

fn env_string(name: &str) -> Option<String> {
	std::env::var(name)
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty())
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Some(v) = env_string("STREAMCHAT_BIND") {
		cfg.server.bind = Some(v);
		info!("server config: bind overridden by env");
	}

	if let Some(v) = env_string("STREAMCHAT_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = env_string("STREAMCHAT_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = env_string("STREAMCHAT_MAX_FRAME_BYTES")
		&& let Ok(bytes) = v.parse::<usize>()
		&& bytes > 0
	{
		cfg.server.max_frame_bytes = bytes;
		info!(bytes, "server config: max_frame_bytes overridden by env");
	}

	if let Some(v) = env_string("STREAMCHAT_MESSAGE_RATE_LIMIT_BURST")
		&& let Ok(burst) = v.parse::<u32>()
	{
		cfg.server.message_rate_limit_burst = burst;
		info!(burst, "server config: message_rate_limit_burst overridden by env");
	}

	if let Some(v) = env_string("STREAMCHAT_MESSAGE_RATE_LIMIT_PER_MINUTE")
		&& let Ok(rate) = v.parse::<u32>()
	{
		cfg.server.message_rate_limit_per_minute = rate;
		info!(rate, "server config: message_rate_limit_per_minute overridden by env");
	}

	if let Some(v) = env_string("STREAMCHAT_DATABASE_URL") {
		cfg.persistence.database_url = Some(v);
		info!("persistence: database_url overridden by env");
	}

	if let Some(v) = env_string("STREAMCHAT_PRESENCE_TIMEOUT_SECS")
		&& let Ok(secs) = v.parse::<u64>()
		&& secs > 0
	{
		cfg.chat.presence_timeout = Duration::from_secs(secs);
		info!(secs, "chat config: presence_timeout overridden by env");
	}

	if let Some(v) = env_string("STREAMCHAT_POLL_INTERVAL_MS")
		&& let Ok(ms) = v.parse::<u64>()
		&& ms > 0
	{
		cfg.chat.poll_interval = Duration::from_millis(ms);
		info!(ms, "chat config: poll_interval overridden by env");
	}

	if cfg.persistence.database_url.is_none() && cfg.dev_streamers.is_empty() {
		warn!("no database_url and no dev_streamers configured; every login will fail with 'Streamer does not exist'");
	}
}
