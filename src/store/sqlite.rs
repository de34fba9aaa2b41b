use std::future::Future;
use std::pin::Pin;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use super::TranscriptStore;
use crate::session::ChatMessage;

/// SQLite-backed transcript store using an sqlx async pool.
///
/// One row per contact, one row per chat; a chat's messages live as a JSON
/// array in a single column. At most one chat per contact is active at a
/// time. Expiry and resets deactivate it, so the next inbound message
/// starts a fresh row.
pub struct SqliteTranscriptStore {
    pool: SqlitePool,
}

impl SqliteTranscriptStore {
    /// Create a new store with an existing pool and run migrations. The
    /// chats→contacts link relies on the pool enforcing `foreign_keys`,
    /// which sqlx turns on per connection by default.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS contacts (
                 phone TEXT PRIMARY KEY,
                 display_name TEXT,
                 first_seen TEXT NOT NULL,
                 last_seen TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chats (
                 id TEXT PRIMARY KEY,
                 contact_phone TEXT NOT NULL REFERENCES contacts(phone),
                 messages TEXT NOT NULL DEFAULT '[]',
                 active INTEGER NOT NULL DEFAULT 1,
                 created_at TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_chats_active_contact
                 ON chats(contact_phone) WHERE active = 1",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn active_chat(&self, phone: &str) -> Result<Option<(String, String)>> {
        let row = sqlx::query(
            "SELECT id, messages
             FROM chats
             WHERE contact_phone = ?1 AND active = 1
             LIMIT 1",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .context("query active chat")?;

        row.map(|r| -> Result<(String, String)> {
            Ok((r.try_get("id")?, r.try_get("messages")?))
        })
        .transpose()
    }

    async fn create_chat(&self, phone: &str, messages_json: &str) -> Result<String> {
        let chat_id = Uuid::new_v4().to_string();
        let timestamp = Utc::now().to_rfc3339();

        // Generic-webhook identities never pass through record_contact;
        // create the link target before the chat row referencing it.
        sqlx::query(
            "INSERT INTO contacts (phone, first_seen, last_seen)
             VALUES (?1, ?2, ?2)
             ON CONFLICT(phone) DO NOTHING",
        )
        .bind(phone)
        .bind(&timestamp)
        .execute(&self.pool)
        .await
        .context("ensure contact")?;

        sqlx::query(
            "INSERT INTO chats (id, contact_phone, messages, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)",
        )
        .bind(&chat_id)
        .bind(phone)
        .bind(messages_json)
        .bind(&timestamp)
        .execute(&self.pool)
        .await
        .context("create chat")?;

        Ok(chat_id)
    }
}

impl TranscriptStore for SqliteTranscriptStore {
    fn load_history<'a>(
        &'a self,
        phone: &'a str,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ChatMessage>>> + Send + 'a>> {
        Box::pin(async move {
            let Some((_, raw)) = self.active_chat(phone).await? else {
                return Ok(Vec::new());
            };

            let mut messages: Vec<ChatMessage> =
                serde_json::from_str(&raw).context("deserialize chat transcript")?;
            if messages.len() > limit {
                messages.drain(..messages.len() - limit);
            }
            Ok(messages)
        })
    }

    fn append<'a>(
        &'a self,
        phone: &'a str,
        messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if messages.is_empty() {
                return Ok(());
            }

            match self.active_chat(phone).await? {
                Some((chat_id, raw)) => {
                    let mut stored: Vec<ChatMessage> =
                        serde_json::from_str(&raw).context("deserialize chat transcript")?;
                    stored.extend_from_slice(messages);

                    let encoded =
                        serde_json::to_string(&stored).context("serialize chat transcript")?;
                    let timestamp = Utc::now().to_rfc3339();
                    sqlx::query(
                        "UPDATE chats SET messages = ?1, updated_at = ?2 WHERE id = ?3",
                    )
                    .bind(&encoded)
                    .bind(&timestamp)
                    .bind(&chat_id)
                    .execute(&self.pool)
                    .await
                    .context("update chat transcript")?;
                }
                None => {
                    let encoded =
                        serde_json::to_string(messages).context("serialize chat transcript")?;
                    self.create_chat(phone, &encoded).await?;
                }
            }

            Ok(())
        })
    }

    fn deactivate<'a>(
        &'a self,
        phone: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let timestamp = Utc::now().to_rfc3339();
            sqlx::query(
                "UPDATE chats
                 SET active = 0, updated_at = ?1
                 WHERE contact_phone = ?2 AND active = 1",
            )
            .bind(&timestamp)
            .bind(phone)
            .execute(&self.pool)
            .await
            .context("deactivate chat")?;
            Ok(())
        })
    }

    fn record_contact<'a>(
        &'a self,
        phone: &'a str,
        display_name: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let timestamp = Utc::now().to_rfc3339();
            sqlx::query(
                "INSERT INTO contacts (phone, display_name, first_seen, last_seen)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(phone) DO UPDATE SET
                     last_seen = excluded.last_seen,
                     display_name = COALESCE(excluded.display_name, contacts.display_name)",
            )
            .bind(phone)
            .bind(display_name)
            .bind(&timestamp)
            .execute(&self.pool)
            .await
            .context("upsert contact")?;
            Ok(())
        })
    }
}
