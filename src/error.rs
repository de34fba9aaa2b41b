use std::time::Duration;

use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `palaver`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum RelayError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Completion gateway ──────────────────────────────────────────────
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    // ── Transport / Channel ─────────────────────────────────────────────
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Completion gateway errors ──────────────────────────────────────────────

/// Faults the completion call can surface. The session registry catches all
/// of these; none may escape the inbound request path.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("completion provider rate-limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("completion timed out after {0:?}")]
    Timeout(Duration),

    #[error("completion response contained no text")]
    Empty,
}

// ─── Transport errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel {channel} send failed: {message}")]
    Send { channel: String, message: String },

    #[error("channel {channel} rejected recipient {to}")]
    RecipientNotAllowed { channel: String, to: String },
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, RelayError>;
