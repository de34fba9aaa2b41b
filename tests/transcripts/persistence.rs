use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use palaver::config::{StorageBackend, StorageConfig};
use palaver::session::{MessageRole, SessionConfig, SessionRegistry};
use palaver::store::{TranscriptStore, create_transcript_store};

use super::{FlakyStore, RecordingBackend, sqlite_store};

fn registry(
    config: &SessionConfig,
    backend: Arc<RecordingBackend>,
    store: Arc<dyn TranscriptStore>,
) -> SessionRegistry {
    SessionRegistry::new(
        config,
        "You are a helpful assistant.",
        Duration::from_secs(5),
        backend,
        Some(store),
    )
}

#[tokio::test]
async fn history_survives_a_registry_restart() {
    let tmp = TempDir::new().expect("tempdir");
    let db_path = tmp.path().join("relay.db");
    let config = SessionConfig::default();

    let first_backend = Arc::new(RecordingBackend::new());
    let first = registry(
        &config,
        Arc::clone(&first_backend),
        sqlite_store(&db_path).await,
    );
    let reply = first.handle_message("+15550001", "What is dbt?").await;
    assert_eq!(reply.ok().as_deref(), Some("ok"));
    drop(first);

    // A new registry over the same database restores the conversation.
    let second_backend = Arc::new(RecordingBackend::new());
    let second = registry(
        &config,
        Arc::clone(&second_backend),
        sqlite_store(&db_path).await,
    );
    let reply = second.handle_message("+15550001", "And Spark?").await;
    assert_eq!(reply.ok().as_deref(), Some("ok"));

    let histories = second_backend.histories().await;
    assert_eq!(histories.len(), 1);
    assert_eq!(histories[0].len(), 3);
    assert_eq!(histories[0][0].role, MessageRole::User);
    assert_eq!(histories[0][0].content, "What is dbt?");
    assert_eq!(histories[0][1].role, MessageRole::Assistant);
    assert_eq!(histories[0][1].content, "ok");
    assert_eq!(histories[0][2].content, "And Spark?");
}

#[tokio::test]
async fn reset_closes_the_durable_chat() {
    let tmp = TempDir::new().expect("tempdir");
    let db_path = tmp.path().join("relay.db");
    let config = SessionConfig::default();

    let backend = Arc::new(RecordingBackend::new());
    let first = registry(&config, Arc::clone(&backend), sqlite_store(&db_path).await);
    first
        .handle_message("+15550001", "remember this")
        .await
        .ok();
    let ack = first.handle_message("+15550001", "reset").await;
    assert_eq!(ack.ok(), Some(SessionConfig::default().reset_ack));
    drop(first);

    let second_backend = Arc::new(RecordingBackend::new());
    let second = registry(
        &config,
        Arc::clone(&second_backend),
        sqlite_store(&db_path).await,
    );
    second.handle_message("+15550001", "fresh start").await.ok();

    let histories = second_backend.histories().await;
    assert_eq!(histories[0].len(), 1, "reset chat must not be restored");
    assert_eq!(histories[0][0].content, "fresh start");
}

#[tokio::test]
async fn expired_session_starts_a_fresh_durable_chat() {
    let tmp = TempDir::new().expect("tempdir");
    let db_path = tmp.path().join("relay.db");
    let config = SessionConfig {
        timeout_secs: 0,
        ..SessionConfig::default()
    };

    let backend = Arc::new(RecordingBackend::new());
    let live = registry(&config, Arc::clone(&backend), sqlite_store(&db_path).await);
    live.handle_message("+15550001", "old topic").await.ok();
    tokio::time::sleep(Duration::from_millis(20)).await;
    live.handle_message("+15550001", "new topic").await.ok();

    let histories = backend.histories().await;
    assert_eq!(histories[1].len(), 1, "expired history must not leak");
    assert_eq!(histories[1][0].content, "new topic");
    drop(live);

    // Only the post-expiry chat is still active on disk.
    let later_backend = Arc::new(RecordingBackend::new());
    let later = registry(
        &SessionConfig::default(),
        Arc::clone(&later_backend),
        sqlite_store(&db_path).await,
    );
    later.handle_message("+15550001", "continuing").await.ok();

    let histories = later_backend.histories().await;
    assert_eq!(histories[0].len(), 3);
    assert_eq!(histories[0][0].content, "new topic");
    assert_eq!(histories[0][2].content, "continuing");
}

#[tokio::test]
async fn sweep_then_message_starts_a_fresh_durable_chat() {
    let tmp = TempDir::new().expect("tempdir");
    let db_path = tmp.path().join("relay.db");
    let config = SessionConfig {
        timeout_secs: 0,
        ..SessionConfig::default()
    };

    let backend = Arc::new(RecordingBackend::new());
    let live = registry(&config, Arc::clone(&backend), sqlite_store(&db_path).await);
    live.handle_message("+15550001", "old topic").await.ok();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The sweep drops the in-memory entry; the durable chat must close with
    // it, or the next message would hydrate the expired conversation back.
    assert_eq!(live.evict_expired().await, 1);
    live.handle_message("+15550001", "new topic").await.ok();

    let histories = backend.histories().await;
    assert_eq!(histories[1].len(), 1, "expired history must not leak");
    assert_eq!(histories[1][0].content, "new topic");
}

#[tokio::test]
async fn idle_transcript_is_not_restored_after_restart() {
    let tmp = TempDir::new().expect("tempdir");
    let db_path = tmp.path().join("relay.db");
    let config = SessionConfig {
        timeout_secs: 0,
        ..SessionConfig::default()
    };

    let backend = Arc::new(RecordingBackend::new());
    let first = registry(&config, Arc::clone(&backend), sqlite_store(&db_path).await);
    first.handle_message("+15550001", "old topic").await.ok();
    drop(first);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // A new process has no in-memory entry to expire; the stored chat's own
    // age decides whether it comes back.
    let second_backend = Arc::new(RecordingBackend::new());
    let second = registry(
        &config,
        Arc::clone(&second_backend),
        sqlite_store(&db_path).await,
    );
    second.handle_message("+15550001", "back again").await.ok();

    let histories = second_backend.histories().await;
    assert_eq!(histories[0].len(), 1, "idle transcript must not be restored");
    assert_eq!(histories[0][0].content, "back again");
}

#[tokio::test]
async fn transient_load_failure_does_not_duplicate_history() {
    let tmp = TempDir::new().expect("tempdir");
    let db_path = tmp.path().join("relay.db");
    let config = SessionConfig::default();

    let backend = Arc::new(RecordingBackend::new());
    let store = Arc::new(FlakyStore::failing_first_load(sqlite_store(&db_path).await));
    let live = registry(&config, Arc::clone(&backend), store);

    live.handle_message("+15550001", "first").await.ok();
    live.handle_message("+15550001", "second").await.ok();

    // The failed first-touch load must not retry after exchanges were
    // mirrored out, or those rows would load back on top of themselves.
    let histories = backend.histories().await;
    assert_eq!(histories[1].len(), 3);
    assert_eq!(histories[1][0].content, "first");
    assert_eq!(histories[1][1].content, "ok");
    assert_eq!(histories[1][2].content, "second");
}

#[tokio::test]
async fn restore_honors_the_history_cap() {
    let tmp = TempDir::new().expect("tempdir");
    let db_path = tmp.path().join("relay.db");
    let config = SessionConfig {
        max_history: 4,
        ..SessionConfig::default()
    };

    let backend = Arc::new(RecordingBackend::new());
    let first = registry(&config, Arc::clone(&backend), sqlite_store(&db_path).await);
    for n in 1..=3 {
        first
            .handle_message("+15550001", &format!("q{n}"))
            .await
            .ok();
    }
    drop(first);

    let second_backend = Arc::new(RecordingBackend::new());
    let second = registry(
        &config,
        Arc::clone(&second_backend),
        sqlite_store(&db_path).await,
    );
    second.handle_message("+15550001", "q4").await.ok();

    // Three exchanges wrote six rows; the restore keeps the newest four and
    // the new question then evicts the oldest of those.
    let histories = second_backend.histories().await;
    assert_eq!(histories[0].len(), 4);
    assert_eq!(histories[0][0].content, "ok");
    assert_eq!(histories[0][1].content, "q3");
    assert_eq!(histories[0][3].content, "q4");
}

#[tokio::test]
async fn contacts_are_isolated_per_phone() {
    let tmp = TempDir::new().expect("tempdir");
    let db_path = tmp.path().join("relay.db");
    let config = SessionConfig::default();

    let backend = Arc::new(RecordingBackend::new());
    let live = registry(&config, Arc::clone(&backend), sqlite_store(&db_path).await);
    live.handle_message("+15550001", "alpha question").await.ok();
    live.handle_message("+15550002", "beta question").await.ok();
    drop(live);

    let second_backend = Arc::new(RecordingBackend::new());
    let second = registry(
        &config,
        Arc::clone(&second_backend),
        sqlite_store(&db_path).await,
    );
    second.handle_message("+15550002", "beta again").await.ok();

    let histories = second_backend.histories().await;
    assert_eq!(histories[0].len(), 3);
    assert!(
        histories[0]
            .iter()
            .all(|m| !m.content.contains("alpha")),
        "one contact's transcript must never surface in another's"
    );
}

#[tokio::test]
async fn memory_backend_yields_no_store() {
    let config = StorageConfig {
        backend: StorageBackend::Memory,
        db_path: String::new(),
    };
    let store = create_transcript_store(&config)
        .await
        .expect("memory backend should succeed");
    assert!(store.is_none());
}

#[tokio::test]
async fn sqlite_store_creates_parent_directories() {
    let tmp = TempDir::new().expect("tempdir");
    let db_path = tmp.path().join("nested").join("deeper").join("relay.db");

    let store = sqlite_store(&db_path).await;
    store
        .record_contact("+15550001", Some("Alice"))
        .await
        .expect("write should succeed");

    assert!(db_path.exists(), "database file should be created on disk");
}
