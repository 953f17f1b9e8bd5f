#![forbid(unsafe_code)]

mod config;
mod server;
mod util;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use streamchat_domain::ConnId;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::ServerConfig;
use crate::server::connection::{ConnectionSettings, handle_connection};
use crate::server::dispatch::ChatDispatcher;
use crate::server::emotes::EmoteRenderer;
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::hub::{SocketHub, SocketHubConfig};
use crate::server::poller;
use crate::server::state::ChatState;
use crate::server::store::{Collaborators, MemoryStore, SqlStore};

const DEFAULT_BIND: &str = "127.0.0.1:18203";

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: streamchat_server [--bind host:port] [--config path]\n\
\n\
Options:\n\
\t--bind     WebSocket listen address (default: {DEFAULT_BIND})\n\
\t--config   Config file (default: ~/.streamchat/config.toml)\n\
\t--help     Show this help\n\
"
	);
	std::process::exit(2)
}

struct Args {
	bind: Option<SocketAddr>,
	config: Option<PathBuf>,
}

fn parse_args() -> Args {
	let mut args = Args {
		bind: None,
		config: None,
	};

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let addr = v.trim().parse::<SocketAddr>().unwrap_or_else(|e| {
					eprintln!("--bind: {e} (expected host:port)");
					usage_and_exit();
				});
				args.bind = Some(addr);
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				args.config = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,streamchat_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("streamchat_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

/// Pick the backing store: SQL when a database is configured, otherwise an
/// in-memory directory seeded from `[[dev_streamers]]`.
async fn build_collaborators(cfg: &ServerConfig) -> anyhow::Result<Collaborators> {
	if let Some(url) = cfg.persistence.database_url.as_deref() {
		let store = SqlStore::connect(url).await?;
		info!(dialect = store.dialect(), "using sql store");
		return Ok(Collaborators::from_store(Arc::new(store)));
	}

	let store = MemoryStore::new();
	for streamer in &cfg.dev_streamers {
		store
			.add_streamer(&streamer.username, &streamer.key)
			.with_context(|| format!("seed dev streamer {:?}", streamer.username))?;
	}
	if cfg.dev_streamers.is_empty() {
		warn!("no database_url and no dev_streamers configured; every login will fail");
	} else {
		info!(streamers = cfg.dev_streamers.len(), "using in-memory store");
	}
	Ok(Collaborators::from_store(Arc::new(store)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let collab = build_collaborators(&server_cfg).await?;

	let emotes = Arc::new(EmoteRenderer::new());
	match collab.catalog.list_all().await {
		Ok(entries) => {
			info!(emotes = entries.len(), "loaded emote catalog");
			emotes.seed_catalog(entries);
		}
		Err(e) => warn!(error = %e, "failed to load emote catalog; poller will retry"),
	}

	let hub = SocketHub::new(SocketHubConfig {
		queue_capacity: server_cfg.server.outbound_queue_capacity,
		debug_logs: cfg!(debug_assertions),
	});
	let state = ChatState::new(&server_cfg.chat, hub, emotes, collab);
	poller::install(&state, &server_cfg.chat);

	let health_state = HealthState::new(state.clone());
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let bind_addr = match args.bind {
		Some(addr) => addr,
		None => server_cfg
			.server
			.bind
			.as_deref()
			.unwrap_or(DEFAULT_BIND)
			.parse::<SocketAddr>()
			.context("parse server.bind (expected host:port)")?,
	};
	let listener = TcpListener::bind(bind_addr)
		.await
		.with_context(|| format!("bind {bind_addr}"))?;
	info!(bind = %bind_addr, "streamchat_server: websocket listener ready");

	let dispatcher = ChatDispatcher::new(state);
	let conn_settings = ConnectionSettings::from_server(&server_cfg.server);

	health_state.mark_ready();

	let mut next_conn_id: u64 = 1;

	loop {
		let (stream, remote) = match listener.accept().await {
			Ok(accepted) => accepted,
			Err(e) => {
				warn!(error = %e, "accept failed");
				continue;
			}
		};

		let conn = ConnId(next_conn_id);
		next_conn_id += 1;
		metrics::counter!("streamchat_server_connections_total").increment(1);

		let dispatcher = dispatcher.clone();
		let conn_settings = conn_settings.clone();
		tokio::spawn(async move {
			if let Err(e) = handle_connection(conn, stream, remote, dispatcher, conn_settings).await {
				warn!(conn_id = %conn, error = %e, "connection handler exited with error");
			}
		});
	}
}
