#![forbid(unsafe_code)]

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use streamchat_domain::{DomainEvent, EmoteCatalogEntry, PendingKind, PendingMessage, RoomKey, StreamerProfile};

use super::{EmoteCatalog, EventLog, PendingQueue, StreamerDirectory};

/// Relational store shared with the portal; the schema is managed outside this crate.
#[derive(Clone)]
pub struct SqlStore {
	backend: SqlBackend,
}

#[derive(Clone)]
enum SqlBackend {
	Sqlite(sqlx::SqlitePool),
	Postgres(sqlx::PgPool),
	Mysql(sqlx::MySqlPool),
}

type ProfileRow = (String, String, Option<String>, Option<String>);
type PendingRow = (i64, String, String, String);

impl SqlStore {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		let backend = if database_url.starts_with("sqlite:") {
			SqlBackend::Sqlite(sqlx::SqlitePool::connect(database_url).await.context("connect sqlite")?)
		} else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
			SqlBackend::Postgres(sqlx::PgPool::connect(database_url).await.context("connect postgres")?)
		} else if database_url.starts_with("mysql:") || database_url.starts_with("mariadb:") {
			SqlBackend::Mysql(sqlx::MySqlPool::connect(database_url).await.context("connect mysql")?)
		} else {
			return Err(anyhow!("unsupported database_url (expected sqlite:, postgres: or mysql:)"));
		};

		Ok(Self { backend })
	}

	pub fn dialect(&self) -> &'static str {
		match self.backend {
			SqlBackend::Sqlite(_) => "sqlite",
			SqlBackend::Postgres(_) => "postgres",
			SqlBackend::Mysql(_) => "mysql",
		}
	}
}

fn profile_from_row((canonical_name, secret_key, description, viewer_password): ProfileRow) -> StreamerProfile {
	StreamerProfile {
		canonical_name,
		secret_key,
		description: description.filter(|d| !d.is_empty()),
		viewer_password: viewer_password.filter(|p| !p.is_empty()),
	}
}

fn pending_from_row((id, username, kind, message): PendingRow) -> PendingMessage {
	PendingMessage {
		id,
		username,
		kind: PendingKind::parse(&kind),
		message,
	}
}

#[async_trait]
impl StreamerDirectory for SqlStore {
	async fn lookup(&self, room: &RoomKey) -> anyhow::Result<Option<StreamerProfile>> {
		let row: Option<ProfileRow> = match &self.backend {
			SqlBackend::Sqlite(pool) => sqlx::query_as(
				"SELECT username, \"key\", description, streampass FROM streamersettings WHERE LOWER(username) = ?",
			)
			.bind(room.as_str())
			.fetch_optional(pool)
			.await
			.context("select streamersettings (sqlite)")?,
			SqlBackend::Postgres(pool) => sqlx::query_as(
				"SELECT username, \"key\", description, streampass FROM streamersettings WHERE LOWER(username) = $1",
			)
			.bind(room.as_str())
			.fetch_optional(pool)
			.await
			.context("select streamersettings (postgres)")?,
			SqlBackend::Mysql(pool) => sqlx::query_as(
				"SELECT username, `key`, description, streampass FROM streamersettings WHERE LOWER(username) = ?",
			)
			.bind(room.as_str())
			.fetch_optional(pool)
			.await
			.context("select streamersettings (mysql)")?,
		};

		Ok(row.map(profile_from_row))
	}

	async fn set_description(&self, room: &RoomKey, text: &str) -> anyhow::Result<()> {
		match &self.backend {
			SqlBackend::Sqlite(pool) => {
				sqlx::query("UPDATE streamersettings SET description = ? WHERE LOWER(username) = ?")
					.bind(text)
					.bind(room.as_str())
					.execute(pool)
					.await
					.context("update description (sqlite)")?;
			}
			SqlBackend::Postgres(pool) => {
				sqlx::query("UPDATE streamersettings SET description = $1 WHERE LOWER(username) = $2")
					.bind(text)
					.bind(room.as_str())
					.execute(pool)
					.await
					.context("update description (postgres)")?;
			}
			SqlBackend::Mysql(pool) => {
				sqlx::query("UPDATE streamersettings SET description = ? WHERE LOWER(username) = ?")
					.bind(text)
					.bind(room.as_str())
					.execute(pool)
					.await
					.context("update description (mysql)")?;
			}
		}

		Ok(())
	}

	async fn set_viewer_password(&self, room: &RoomKey, password: Option<&str>) -> anyhow::Result<()> {
		match &self.backend {
			SqlBackend::Sqlite(pool) => {
				sqlx::query("UPDATE streamersettings SET streampass = ? WHERE LOWER(username) = ?")
					.bind(password)
					.bind(room.as_str())
					.execute(pool)
					.await
					.context("update streampass (sqlite)")?;
			}
			SqlBackend::Postgres(pool) => {
				sqlx::query("UPDATE streamersettings SET streampass = $1 WHERE LOWER(username) = $2")
					.bind(password)
					.bind(room.as_str())
					.execute(pool)
					.await
					.context("update streampass (postgres)")?;
			}
			SqlBackend::Mysql(pool) => {
				sqlx::query("UPDATE streamersettings SET streampass = ? WHERE LOWER(username) = ?")
					.bind(password)
					.bind(room.as_str())
					.execute(pool)
					.await
					.context("update streampass (mysql)")?;
			}
		}

		Ok(())
	}
}

#[async_trait]
impl PendingQueue for SqlStore {
	async fn drain(&self) -> anyhow::Result<Vec<PendingMessage>> {
		let rows: Vec<PendingRow> = match &self.backend {
			SqlBackend::Sqlite(pool) => {
				sqlx::query_as("SELECT id, username, type, message FROM pendingmessages ORDER BY id")
					.fetch_all(pool)
					.await
					.context("select pendingmessages (sqlite)")?
			}
			SqlBackend::Postgres(pool) => sqlx::query_as(
				"SELECT CAST(id AS BIGINT), username, type, message FROM pendingmessages ORDER BY id",
			)
			.fetch_all(pool)
			.await
			.context("select pendingmessages (postgres)")?,
			SqlBackend::Mysql(pool) => sqlx::query_as(
				"SELECT CAST(id AS SIGNED), username, `type`, message FROM pendingmessages ORDER BY id",
			)
			.fetch_all(pool)
			.await
			.context("select pendingmessages (mysql)")?,
		};

		Ok(rows.into_iter().map(pending_from_row).collect())
	}

	async fn delete(&self, id: i64) -> anyhow::Result<()> {
		match &self.backend {
			SqlBackend::Sqlite(pool) => {
				sqlx::query("DELETE FROM pendingmessages WHERE id = ?")
					.bind(id)
					.execute(pool)
					.await
					.context("delete pendingmessages row (sqlite)")?;
			}
			SqlBackend::Postgres(pool) => {
				sqlx::query("DELETE FROM pendingmessages WHERE id = $1")
					.bind(id)
					.execute(pool)
					.await
					.context("delete pendingmessages row (postgres)")?;
			}
			SqlBackend::Mysql(pool) => {
				sqlx::query("DELETE FROM pendingmessages WHERE id = ? LIMIT 1")
					.bind(id)
					.execute(pool)
					.await
					.context("delete pendingmessages row (mysql)")?;
			}
		}

		Ok(())
	}

	async fn purge_all_for(&self, room: &RoomKey) -> anyhow::Result<()> {
		match &self.backend {
			SqlBackend::Sqlite(pool) => {
				sqlx::query("DELETE FROM pendingmessages WHERE LOWER(username) = ?")
					.bind(room.as_str())
					.execute(pool)
					.await
					.context("purge pendingmessages (sqlite)")?;
			}
			SqlBackend::Postgres(pool) => {
				sqlx::query("DELETE FROM pendingmessages WHERE LOWER(username) = $1")
					.bind(room.as_str())
					.execute(pool)
					.await
					.context("purge pendingmessages (postgres)")?;
			}
			SqlBackend::Mysql(pool) => {
				sqlx::query("DELETE FROM pendingmessages WHERE LOWER(username) = ?")
					.bind(room.as_str())
					.execute(pool)
					.await
					.context("purge pendingmessages (mysql)")?;
			}
		}

		Ok(())
	}
}

#[async_trait]
impl EmoteCatalog for SqlStore {
	async fn list_all(&self) -> anyhow::Result<Vec<EmoteCatalogEntry>> {
		let rows: Vec<(String, String)> = match &self.backend {
			SqlBackend::Sqlite(pool) => sqlx::query_as("SELECT alias, uri FROM emotes ORDER BY alias")
				.fetch_all(pool)
				.await
				.context("select emotes (sqlite)")?,
			SqlBackend::Postgres(pool) => sqlx::query_as("SELECT alias, uri FROM emotes ORDER BY alias")
				.fetch_all(pool)
				.await
				.context("select emotes (postgres)")?,
			SqlBackend::Mysql(pool) => sqlx::query_as("SELECT alias, uri FROM emotes ORDER BY alias")
				.fetch_all(pool)
				.await
				.context("select emotes (mysql)")?,
		};

		Ok(rows
			.into_iter()
			.map(|(alias, uri)| EmoteCatalogEntry { alias, uri })
			.collect())
	}
}

#[async_trait]
impl EventLog for SqlStore {
	async fn append(&self, event: &DomainEvent) -> anyhow::Result<()> {
		let meta = serde_json::to_string(&event.meta()).context("encode event meta")?;

		match &self.backend {
			SqlBackend::Sqlite(pool) => {
				sqlx::query("INSERT INTO events (\"timestamp\", username, type, meta) VALUES (?, ?, ?, ?)")
					.bind(event.timestamp)
					.bind(event.room.as_str())
					.bind(event.type_name())
					.bind(meta.as_str())
					.execute(pool)
					.await
					.context("insert events (sqlite)")?;
			}
			SqlBackend::Postgres(pool) => {
				sqlx::query("INSERT INTO events (\"timestamp\", username, type, meta) VALUES ($1, $2, $3, $4)")
					.bind(event.timestamp)
					.bind(event.room.as_str())
					.bind(event.type_name())
					.bind(meta.as_str())
					.execute(pool)
					.await
					.context("insert events (postgres)")?;
			}
			SqlBackend::Mysql(pool) => {
				sqlx::query("INSERT INTO events (`timestamp`, username, `type`, meta) VALUES (?, ?, ?, ?)")
					.bind(event.timestamp)
					.bind(event.room.as_str())
					.bind(event.type_name())
					.bind(meta.as_str())
					.execute(pool)
					.await
					.context("insert events (mysql)")?;
			}
		}

		Ok(())
	}
}
