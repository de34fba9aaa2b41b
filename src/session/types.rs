use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role tag on a conversation entry. The wire format (both the completion
/// API and the durable store) uses the lowercase form.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// One immutable conversation entry. Insertion order within a session is the
/// source of truth; `timestamp` is metadata, not a sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Read-only registry aggregate for the observability surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryStats {
    pub active_sessions: usize,
    pub total_messages: usize,
}

fn default_max_history() -> usize {
    10
}

fn default_timeout_secs() -> u64 {
    30 * 60
}

fn default_reset_keywords() -> Vec<String> {
    vec!["clear".into(), "reset".into(), "start over".into()]
}

fn default_reset_ack() -> String {
    "Conversation cleared. Let's start fresh! How can I help you with data engineering?".into()
}

fn default_fallback_reply() -> String {
    "Sorry, I encountered an error. Please try again or type 'clear' to reset our conversation."
        .into()
}

/// Tunables for the session lifecycle. Fixed for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Cap on retained messages per conversation (user and assistant
    /// entries both count).
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Idle seconds after which a session expires.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Inbound texts that clear the conversation instead of being relayed.
    /// Matched case-insensitively against the trimmed message.
    #[serde(default = "default_reset_keywords")]
    pub reset_keywords: Vec<String>,

    /// Reply sent when a reset keyword matches.
    #[serde(default = "default_reset_ack")]
    pub reset_ack: String,

    /// Reply sent when the completion backend fails.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            timeout_secs: default_timeout_secs(),
            reset_keywords: default_reset_keywords(),
            reset_ack: default_reset_ack(),
            fallback_reply: default_fallback_reply(),
        }
    }
}
