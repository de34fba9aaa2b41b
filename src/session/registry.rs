use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::providers::CompletionBackend;
use crate::store::TranscriptStore;
use crate::util::truncate_with_ellipsis;

use super::history::MessageHistory;
use super::types::{ChatMessage, RegistryStats, SessionConfig};

/// Expiry policy: a session is stale once its idle age exceeds `timeout`.
///
/// Kept as a free function over plain instants so tests can exercise the
/// policy without a registry or a real clock.
#[must_use]
pub fn is_expired(last_activity: Instant, now: Instant, timeout: Duration) -> bool {
    now.saturating_duration_since(last_activity) > timeout
}

/// Mutable per-conversation state. Only reachable through the entry mutex.
struct SessionInner {
    history: MessageHistory,
    last_activity: Instant,
    /// Whether the durable backend (when configured) has been consulted for
    /// this session's prior active transcript.
    hydrated: bool,
}

/// One conversation slot in the registry map.
///
/// `inner` serializes every read-modify-write for the identity. The atomics
/// mirror `inner` after each mutation so `stats()` and the eviction sweep can
/// observe activity without contending on the mutex.
struct SessionEntry {
    inner: Mutex<SessionInner>,
    last_activity_ms: AtomicU64,
    message_count: AtomicUsize,
}

impl SessionEntry {
    fn new(cap: usize, now_ms: u64) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                history: MessageHistory::new(cap),
                last_activity: Instant::now(),
                hydrated: false,
            }),
            last_activity_ms: AtomicU64::new(now_ms),
            message_count: AtomicUsize::new(0),
        }
    }

    fn publish(&self, inner: &SessionInner, epoch: Instant) {
        let ms = inner.last_activity.saturating_duration_since(epoch).as_millis();
        self.last_activity_ms
            .store(u64::try_from(ms).unwrap_or(u64::MAX), Ordering::Release);
        self.message_count.store(inner.history.len(), Ordering::Release);
    }
}

/// Identity-keyed session lifecycle manager.
///
/// Owns every live conversation: creation, bounded history, expiry, and the
/// request→completion→reply cycle. Operations on one identity serialize on
/// that identity's mutex; distinct identities never block each other. The
/// sharded map itself is only locked for key insertion, lookup, and sweeps.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionEntry>>,
    epoch: Instant,
    max_history: usize,
    idle_timeout: Duration,
    reset_keywords: Vec<String>,
    reset_ack: String,
    system_prompt: String,
    request_timeout: Duration,
    backend: Arc<dyn CompletionBackend>,
    transcripts: Option<Arc<dyn TranscriptStore>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(
        config: &SessionConfig,
        system_prompt: impl Into<String>,
        request_timeout: Duration,
        backend: Arc<dyn CompletionBackend>,
        transcripts: Option<Arc<dyn TranscriptStore>>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            epoch: Instant::now(),
            max_history: config.max_history,
            idle_timeout: Duration::from_secs(config.timeout_secs),
            reset_keywords: config
                .reset_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .collect(),
            reset_ack: config.reset_ack.clone(),
            system_prompt: system_prompt.into(),
            request_timeout,
            backend,
            transcripts,
        }
    }

    /// Run one full inbound exchange for `identity`: reset short-circuit,
    /// lazy expiry, user append, completion call, assistant append.
    ///
    /// The per-identity critical section is held across the completion call,
    /// so one user's messages are answered strictly in arrival order while
    /// other identities proceed in parallel. On `GatewayError` the appended
    /// user message is kept and `last_activity` is not advanced further; the
    /// caller owns any user-facing fallback text.
    pub async fn handle_message(
        &self,
        identity: &str,
        body: &str,
    ) -> Result<String, GatewayError> {
        loop {
            let entry = self.checkout(identity);
            let mut session = entry.inner.lock().await;
            // The sweep can detach an entry between checkout and lock; work
            // on a detached entry would be invisible to the next message.
            if !self.is_current(identity, &entry) {
                continue;
            }

            let now = Instant::now();
            if is_expired(session.last_activity, now, self.idle_timeout)
                && !session.history.is_empty()
            {
                info!(identity, "session expired, starting fresh");
                self.start_fresh(identity, &mut session).await;
            }

            if self.is_reset_keyword(body) {
                info!(identity, "reset keyword received, clearing session");
                self.start_fresh(identity, &mut session).await;
                session.last_activity = now;
                entry.publish(&session, self.epoch);
                return Ok(self.reset_ack.clone());
            }

            self.hydrate(identity, &mut session).await;

            let user_msg = ChatMessage::user(body);
            session.history.append(user_msg.clone());
            session.last_activity = now;
            entry.publish(&session, self.epoch);
            self.mirror_append(identity, &[user_msg]).await;

            debug!(
                identity,
                history_len = session.history.len(),
                body = %truncate_with_ellipsis(body, 80),
                "relaying message to completion backend"
            );

            let snapshot = session.history.snapshot();
            let reply = match tokio::time::timeout(
                self.request_timeout,
                self.backend.complete(&self.system_prompt, &snapshot),
            )
            .await
            {
                Err(_elapsed) => {
                    warn!(identity, "completion call exceeded {:?}", self.request_timeout);
                    return Err(GatewayError::Timeout(self.request_timeout));
                }
                Ok(Err(err)) => {
                    warn!(identity, "completion call failed: {err}");
                    return Err(err);
                }
                Ok(Ok(reply)) => reply,
            };

            let assistant_msg = ChatMessage::assistant(reply.clone());
            session.history.append(assistant_msg.clone());
            session.last_activity = Instant::now();
            entry.publish(&session, self.epoch);
            self.mirror_append(identity, &[assistant_msg]).await;

            debug!(
                identity,
                reply = %truncate_with_ellipsis(&reply, 80),
                "exchange complete"
            );
            return Ok(reply);
        }
    }

    /// Record the sender against the durable contact table, when a durable
    /// backend is configured. Never fails the caller.
    pub async fn note_contact(&self, identity: &str, display_name: Option<&str>) {
        if let Some(store) = &self.transcripts {
            if let Err(err) = store.record_contact(identity, display_name).await {
                warn!(identity, "failed to record contact profile: {err:#}");
            }
        }
    }

    /// Remove every expired session that is not currently inside an
    /// exchange, closing each one's durable chat so the next message from
    /// that identity starts empty. Returns how many were evicted.
    pub async fn evict_expired(&self) -> usize {
        let now_ms = self.now_ms();
        let timeout_ms = u64::try_from(self.idle_timeout.as_millis()).unwrap_or(u64::MAX);
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                now_ms.saturating_sub(entry.last_activity_ms.load(Ordering::Acquire)) > timeout_ms
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for identity in stale {
            // Re-checked under the shard lock: a locked entry is mid-exchange
            // and a refreshed one is live again; both stay for a later sweep.
            let removed = self.sessions.remove_if(&identity, |_, entry| {
                now_ms.saturating_sub(entry.last_activity_ms.load(Ordering::Acquire)) > timeout_ms
                    && entry.inner.try_lock().is_ok()
            });
            if removed.is_some() {
                self.close_chat(&identity).await;
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(evicted, "eviction sweep removed expired sessions");
        }
        evicted
    }

    /// Aggregate over live sessions. Reads only the published atomics: never
    /// takes a session mutex and never advances any `last_activity`. Sessions
    /// already past the idle timeout are excluded even before a sweep runs.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let now_ms = self.now_ms();
        let timeout_ms = u64::try_from(self.idle_timeout.as_millis()).unwrap_or(u64::MAX);
        let mut stats = RegistryStats::default();
        for entry in self.sessions.iter() {
            let idle = now_ms.saturating_sub(entry.last_activity_ms.load(Ordering::Acquire));
            if idle > timeout_ms {
                continue;
            }
            stats.active_sessions += 1;
            stats.total_messages += entry.message_count.load(Ordering::Acquire);
        }
        stats
    }

    /// Fetch the live entry for `identity`, creating it atomically when
    /// absent. Concurrent callers for one identity always converge on the
    /// same entry.
    fn checkout(&self, identity: &str) -> Arc<SessionEntry> {
        if let Some(entry) = self.sessions.get(identity) {
            return Arc::clone(entry.value());
        }
        let entry = self
            .sessions
            .entry(identity.to_string())
            .or_insert_with(|| {
                info!(identity, "session created");
                Arc::new(SessionEntry::new(self.max_history, self.now_ms()))
            });
        Arc::clone(entry.value())
    }

    fn is_current(&self, identity: &str, entry: &Arc<SessionEntry>) -> bool {
        self.sessions
            .get(identity)
            .is_some_and(|current| Arc::ptr_eq(entry, current.value()))
    }

    fn is_reset_keyword(&self, body: &str) -> bool {
        let normalized = body.trim().to_lowercase();
        self.reset_keywords.iter().any(|k| *k == normalized)
    }

    /// Clear the in-memory history and close the durable chat so the next
    /// exchange starts an empty conversation in every storage mode.
    async fn start_fresh(&self, identity: &str, session: &mut SessionInner) {
        session.history.clear();
        session.hydrated = true;
        self.close_chat(identity).await;
    }

    /// Close the identity's durable chat, when a durable backend is
    /// configured. Failures are logged and absorbed.
    async fn close_chat(&self, identity: &str) {
        if let Some(store) = &self.transcripts {
            if let Err(err) = store.deactivate(identity).await {
                warn!(identity, "failed to close durable chat: {err:#}");
            }
        }
    }

    /// First-touch load of the prior active transcript. A transcript idle
    /// past the session timeout is closed instead of restored, so expiry
    /// holds whether the in-memory entry was swept, went stale in place, or
    /// the process restarted. Load failures leave `hydrated` unset so the
    /// next message retries.
    async fn hydrate(&self, identity: &str, session: &mut SessionInner) {
        if session.hydrated {
            return;
        }
        // Messages already exchanged in this session were mirrored out;
        // loading them back would double the prompt context.
        if !session.history.is_empty() {
            session.hydrated = true;
            return;
        }
        let Some(store) = &self.transcripts else {
            session.hydrated = true;
            return;
        };
        match store.load_history(identity, self.max_history).await {
            Ok(messages) => {
                let stale = messages.last().is_some_and(|last| {
                    Utc::now()
                        .signed_duration_since(last.timestamp)
                        .to_std()
                        .is_ok_and(|idle| idle > self.idle_timeout)
                });
                if stale {
                    info!(identity, "stored transcript idle past timeout, starting fresh");
                    self.close_chat(identity).await;
                    session.hydrated = true;
                    return;
                }
                for message in messages {
                    session.history.append(message);
                }
                session.hydrated = true;
                if !session.history.is_empty() {
                    debug!(
                        identity,
                        restored = session.history.len(),
                        "restored transcript from durable store"
                    );
                }
            }
            Err(err) => {
                warn!(identity, "failed to load durable transcript: {err:#}");
            }
        }
    }

    async fn mirror_append(&self, identity: &str, messages: &[ChatMessage]) {
        if let Some(store) = &self.transcripts {
            if let Err(err) = store.append(identity, messages).await {
                warn!(identity, "failed to persist messages: {err:#}");
            }
        }
    }

    fn now_ms(&self) -> u64 {
        let ms = Instant::now()
            .saturating_duration_since(self.epoch)
            .as_millis();
        u64::try_from(ms).unwrap_or(u64::MAX)
    }
}
