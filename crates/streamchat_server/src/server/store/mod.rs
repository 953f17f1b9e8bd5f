#![forbid(unsafe_code)]

pub mod memory;
pub mod sql;

use std::sync::Arc;

use async_trait::async_trait;
use streamchat_domain::{DomainEvent, EmoteCatalogEntry, PendingMessage, RoomKey, StreamerProfile};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use memory::MemoryStore;
pub use sql::SqlStore;

/// Streamer settings owned by the portal.
#[async_trait]
pub trait StreamerDirectory: Send + Sync {
	async fn lookup(&self, room: &RoomKey) -> anyhow::Result<Option<StreamerProfile>>;

	async fn set_description(&self, room: &RoomKey, text: &str) -> anyhow::Result<()>;

	/// `None` clears the password.
	async fn set_viewer_password(&self, room: &RoomKey, password: Option<&str>) -> anyhow::Result<()>;
}

/// Durable queue of API-submitted chat messages.
#[async_trait]
pub trait PendingQueue: Send + Sync {
	/// Every queued row, oldest first. Rows stay queued until deleted.
	async fn drain(&self) -> anyhow::Result<Vec<PendingMessage>>;

	async fn delete(&self, id: i64) -> anyhow::Result<()>;

	async fn purge_all_for(&self, room: &RoomKey) -> anyhow::Result<()>;
}

#[async_trait]
pub trait EmoteCatalog: Send + Sync {
	async fn list_all(&self) -> anyhow::Result<Vec<EmoteCatalogEntry>>;
}

/// Append-only analytics sink.
#[async_trait]
pub trait EventLog: Send + Sync {
	async fn append(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// External stores the chat core talks to.
#[derive(Clone)]
pub struct Collaborators {
	pub directory: Arc<dyn StreamerDirectory>,
	pub queue: Arc<dyn PendingQueue>,
	pub catalog: Arc<dyn EmoteCatalog>,
	pub events: EventLogWriter,
}

impl Collaborators {
	/// Every role served by one backing store.
	pub fn from_store<S>(store: Arc<S>) -> Self
	where
		S: StreamerDirectory + PendingQueue + EmoteCatalog + EventLog + 'static,
	{
		Self {
			directory: store.clone(),
			queue: store.clone(),
			catalog: store.clone(),
			events: EventLogWriter::spawn(store),
		}
	}
}

/// Fire-and-forget front of an [`EventLog`].
///
/// `append` never waits; a background task performs the writes in order.
#[derive(Clone, Debug)]
pub struct EventLogWriter {
	tx: mpsc::UnboundedSender<DomainEvent>,
}

impl EventLogWriter {
	/// Must be called within a tokio runtime.
	pub fn spawn(log: Arc<dyn EventLog>) -> Self {
		let (tx, mut rx) = mpsc::unbounded_channel::<DomainEvent>();

		tokio::spawn(async move {
			while let Some(event) = rx.recv().await {
				match log.append(&event).await {
					Ok(()) => {
						metrics::counter!("streamchat_server_events_logged_total").increment(1);
					}
					Err(e) => {
						metrics::counter!("streamchat_server_event_log_failures_total").increment(1);
						warn!(room = %event.room, kind = event.type_name(), error = %e, "event log append failed");
					}
				}
			}
			debug!("event log writer stopped");
		});

		Self { tx }
	}

	pub fn append(&self, event: DomainEvent) {
		if self.tx.send(event).is_err() {
			metrics::counter!("streamchat_server_event_log_failures_total").increment(1);
			warn!("event log writer is gone; dropping event");
		}
	}
}
