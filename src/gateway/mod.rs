//! Axum-based HTTP gateway with body limits and request timeouts.
//!
//! Inbound surface of the relay:
//! - `GET  /health` and `GET /stats` for liveness and registry counters
//! - `GET  /whatsapp` for Meta's webhook verification handshake
//! - `POST /whatsapp` for Cloud API message deliveries
//! - `POST /webhook` for the generic channel-agnostic webhook
//! - `POST /send` for operator-initiated outbound messages

mod handlers;
mod signature;

pub use signature::verify_webhook_signature;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::debug;

use crate::channels::WhatsAppChannel;
use crate::config::Config;
use crate::session::SessionRegistry;

use handlers::{
    handle_health, handle_send, handle_stats, handle_webhook, handle_whatsapp_message,
    handle_whatsapp_verify,
};

/// Maximum request body size (64KB).
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout. Sits above the completion call's own timeout so the
/// session layer, not the HTTP layer, decides how a slow backend is reported.
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Shared state for all axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub whatsapp: Option<Arc<WhatsAppChannel>>,
    /// Shared secret for the generic `/webhook` endpoint (`X-Webhook-Secret`).
    pub webhook_secret: Option<Arc<str>>,
    /// WhatsApp app secret for webhook signature verification
    /// (`X-Hub-Signature-256`).
    pub whatsapp_app_secret: Option<Arc<str>>,
    /// Reply substituted when the completion backend fails mid-exchange.
    pub fallback_reply: Arc<str>,
    /// Config echoes for the `/stats` endpoint.
    pub max_history: usize,
    pub session_timeout_secs: u64,
    pub started_at: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: &Config,
        registry: Arc<SessionRegistry>,
        whatsapp: Option<Arc<WhatsAppChannel>>,
    ) -> Self {
        Self {
            registry,
            whatsapp,
            webhook_secret: config.gateway.webhook_secret.as_deref().map(Arc::from),
            whatsapp_app_secret: config
                .whatsapp
                .app_secret
                .as_deref()
                .map(str::trim)
                .filter(|secret| !secret.is_empty())
                .map(Arc::from),
            fallback_reply: Arc::from(config.session.fallback_reply.as_str()),
            max_history: config.session.max_history,
            session_timeout_secs: config.session.timeout_secs,
            started_at: Instant::now(),
        }
    }
}

/// Generic webhook request body.
#[derive(serde::Deserialize, serde::Serialize)]
pub struct WebhookBody {
    pub from: String,
    pub message: String,
}

/// Outbound send request body.
#[derive(serde::Deserialize, serde::Serialize)]
pub struct SendBody {
    pub to: String,
    pub message: String,
}

/// Meta webhook verification query params.
#[derive(serde::Deserialize)]
pub struct WhatsAppVerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Run the HTTP gateway, binding to `host:port`.
pub async fn run_gateway(host: &str, port: u16, state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("parse gateway bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind gateway socket")?;

    run_gateway_with_listener(host, listener, state).await
}

/// Run the HTTP gateway from a pre-bound listener.
pub async fn run_gateway_with_listener(
    host: &str,
    listener: tokio::net::TcpListener,
    state: AppState,
) -> Result<()> {
    let actual_port = listener
        .local_addr()
        .context("get gateway listener local address")?
        .port();

    print_gateway_banner(
        &format!("{host}:{actual_port}"),
        state.whatsapp.is_some(),
        state.webhook_secret.is_some(),
    );

    let app = build_app(state);
    axum::serve(listener, app)
        .await
        .context("serve HTTP gateway")?;

    Ok(())
}

/// Periodically drop expired idle sessions from the registry.
pub fn spawn_eviction_sweeper(
    registry: Arc<SessionRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let evicted = registry.evict_expired().await;
            if evicted > 0 {
                debug!(evicted, "expired sessions evicted");
            }
        }
    })
}

fn print_gateway_banner(display_addr: &str, whatsapp_enabled: bool, webhook_secret: bool) {
    println!("Gateway listening on {display_addr}");
    println!("  GET  /health");
    println!("  GET  /stats");
    if whatsapp_enabled {
        println!("  GET  /whatsapp");
        println!("  POST /whatsapp");
        println!("  POST /send");
    }
    println!("  POST /webhook");
    if webhook_secret {
        println!("  Webhook secret enabled");
    }
}

fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/whatsapp", get(handle_whatsapp_verify))
        .route("/whatsapp", post(handle_whatsapp_message))
        .route("/webhook", post(handle_webhook))
        .route("/send", post(handle_send))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}
