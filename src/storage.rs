use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::{Conversation, ConversationId};

// Conversations are stored whole, one JSON record per id.
// The implicit rowid survives upserts, so it doubles as insertion order.
const MIGRATIONS_SQL: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY NOT NULL, -- UUID
    record TEXT NOT NULL, -- JSON-serialized Conversation
    completed INTEGER NOT NULL DEFAULT 0,
    last_updated_at INTEGER NOT NULL -- Unix Timestamp (milliseconds)
);
";

/// Durable conversation-id -> conversation mapping.
///
/// Writes are whole-record overwrites, last write wins.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get(&self, id: ConversationId) -> Result<Option<Conversation>, anyhow::Error>;

    async fn put(&self, conversation: &Conversation) -> Result<(), anyhow::Error>;

    /// Every stored conversation, in insertion order.
    async fn list_all(&self) -> Result<Vec<Conversation>, anyhow::Error>;
}

#[derive(Debug)]
pub struct SqliteChatStore {
    pool: SqlitePool,
}

impl SqliteChatStore {
    /// Opens (creating if needed) the database at `db_path` and runs migrations.
    pub async fn open(db_path: &Path) -> Result<Self, anyhow::Error> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        log::info!("Connecting to database: {}", db_url);

        if !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            log::info!("Database file not found, creating...");
            Sqlite::create_database(&db_url)
                .await
                .context("Failed to create database")?;
        }

        let pool = SqlitePoolOptions::new()
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), anyhow::Error> {
        log::info!("Running database migrations...");
        sqlx::query(MIGRATIONS_SQL)
            .execute(pool)
            .await
            .context("Failed to run database migrations")?;
        log::info!("Database migrations completed.");
        Ok(())
    }

    fn decode(record: &str) -> Result<Conversation, anyhow::Error> {
        serde_json::from_str(record).context("Failed to decode stored conversation")
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn get(&self, id: ConversationId) -> Result<Option<Conversation>, anyhow::Error> {
        let id_text = id.to_string();
        log::debug!("Fetching conversation with ID: {}", id_text);

        let row = sqlx::query("SELECT record FROM conversations WHERE id = ?")
            .bind(&id_text)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch conversation from database")?;

        match row {
            Some(r) => {
                let record: String = r.try_get("record").context("Missing record column")?;
                Ok(Some(Self::decode(&record)?))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, conversation: &Conversation) -> Result<(), anyhow::Error> {
        let stored = conversation.persisted();
        let id_text = stored.id.to_string();
        let record = serde_json::to_string(&stored).context("Failed to encode conversation")?;
        let last_updated_ts = stored.last_updated.timestamp_millis();
        log::debug!(
            "Saving conversation {} ({} messages, completed: {})",
            id_text,
            stored.transcript.len(),
            stored.completed
        );

        sqlx::query(
            r#"
            INSERT INTO conversations (id, record, completed, last_updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                record = excluded.record,
                completed = excluded.completed,
                last_updated_at = excluded.last_updated_at
            "#,
        )
        .bind(&id_text)
        .bind(&record)
        .bind(stored.completed)
        .bind(last_updated_ts)
        .execute(&self.pool)
        .await
        .context("Failed to upsert conversation into database")?;

        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Conversation>, anyhow::Error> {
        log::debug!("Fetching all conversations from database");
        let rows = sqlx::query("SELECT record FROM conversations ORDER BY rowid ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch conversations from database")?;

        let conversations = rows
            .into_iter()
            .map(|row| {
                let record: String = row.try_get("record").context("Missing record column")?;
                Self::decode(&record)
            })
            .collect::<Result<Vec<Conversation>, anyhow::Error>>()?;

        log::info!("Fetched {} conversations", conversations.len());
        Ok(conversations)
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryChatStore {
    // Value carries the insertion sequence so `list_all` can keep insertion order
    conversations: DashMap<ConversationId, (u64, Conversation)>,
    next_seq: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls served so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn get(&self, id: ConversationId) -> Result<Option<Conversation>, anyhow::Error> {
        Ok(self.conversations.get(&id).map(|entry| entry.1.clone()))
    }

    async fn put(&self, conversation: &Conversation) -> Result<(), anyhow::Error> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let stored = conversation.persisted();
        self.conversations
            .entry(stored.id)
            .and_modify(|entry| entry.1 = stored.clone())
            .or_insert_with(|| (self.next_seq.fetch_add(1, Ordering::SeqCst), stored.clone()));
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Conversation>, anyhow::Error> {
        let mut entries: Vec<(u64, Conversation)> = self
            .conversations
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        Ok(entries.into_iter().map(|(_, c)| c).collect())
    }
}
