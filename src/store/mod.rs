//! Durable transcript storage.
//!
//! The in-memory registry is the source of truth for live conversations;
//! this layer mirrors exchanges to SQLite so history survives restarts.
//! Store faults after startup are logged and absorbed, never surfaced to
//! the sender.

mod sqlite;

pub use sqlite::SqliteTranscriptStore;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use crate::config::{StorageBackend, StorageConfig};
use crate::session::ChatMessage;

/// Async transcript persistence contract.
pub trait TranscriptStore: Send + Sync {
    /// Messages of the contact's active chat, oldest first, capped to the
    /// newest `limit` entries.
    fn load_history<'a>(
        &'a self,
        phone: &'a str,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ChatMessage>>> + Send + 'a>>;

    /// Append messages to the contact's active chat, creating one if none
    /// is active.
    fn append<'a>(
        &'a self,
        phone: &'a str,
        messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Close the contact's active chat. The next append starts a fresh one.
    fn deactivate<'a>(
        &'a self,
        phone: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Upsert the contact, refreshing `last_seen` and the display name when
    /// one is provided.
    fn record_contact<'a>(
        &'a self,
        phone: &'a str,
        display_name: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Build the transcript store selected by `config`. The memory backend
/// yields `None`: conversations then live only in process.
pub async fn create_transcript_store(
    config: &StorageConfig,
) -> Result<Option<Arc<dyn TranscriptStore>>> {
    match config.backend {
        StorageBackend::Memory => Ok(None),
        StorageBackend::Sqlite => {
            let path = config.resolved_db_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("create storage directory {}", parent.display())
                })?;
            }

            let options = SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true)
                .foreign_keys(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await
                .with_context(|| format!("open transcript database {}", path.display()))?;

            let store = SqliteTranscriptStore::new(pool).await?;
            info!(path = %path.display(), "transcript store ready");
            Ok(Some(Arc::new(store)))
        }
    }
}
