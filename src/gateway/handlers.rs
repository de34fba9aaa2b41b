use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};

use crate::channels::WhatsAppChannel;
use crate::error::TransportError;
use crate::util::{constant_time_eq, truncate_with_ellipsis};

use super::signature::verify_webhook_signature;
use super::{AppState, SendBody, WebhookBody, WhatsAppVerifyQuery};

fn whatsapp_not_configured_response() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "WhatsApp not configured"})),
    )
}

fn invalid_signature_response() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "Invalid signature"})),
    )
}

fn invalid_payload_response() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": "Invalid JSON payload"})),
    )
}

fn ack_response() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

fn validation_response(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(serde_json::json!({"error": message})),
    )
}

/// Resolve the reply for one inbound message. A completion failure never
/// escapes to the sender; they get the configured fallback text instead.
async fn reply_or_fallback(state: &AppState, identity: &str, content: &str) -> String {
    match state.registry.handle_message(identity, content).await {
        Ok(reply) => reply,
        Err(error) => {
            tracing::error!(identity, %error, "completion failed, sending fallback reply");
            state.fallback_reply.to_string()
        }
    }
}

async fn send_whatsapp_reply_or_log(wa: &WhatsAppChannel, sender: &str, message: &str) {
    if let Err(error) = wa.send(sender, message).await {
        tracing::error!("failed to send WhatsApp reply: {error}");
    }
}

/// GET /health
pub(super) async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

/// GET /stats
pub(super) async fn handle_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.registry.stats();
    Json(serde_json::json!({
        "active_sessions": stats.active_sessions,
        "total_messages": stats.total_messages,
        "max_history": state.max_history,
        "session_timeout_secs": state.session_timeout_secs,
    }))
}

/// GET /whatsapp: Meta webhook verification handshake.
pub(super) async fn handle_whatsapp_verify(
    State(state): State<AppState>,
    Query(params): Query<WhatsAppVerifyQuery>,
) -> impl IntoResponse {
    let Some(ref wa) = state.whatsapp else {
        return (StatusCode::NOT_FOUND, "WhatsApp not configured".to_string());
    };

    // Constant-time comparison to prevent timing attacks on the token
    let token_matches = params
        .verify_token
        .as_deref()
        .is_some_and(|t| constant_time_eq(t, wa.verify_token()));
    if params.mode.as_deref() == Some("subscribe") && token_matches {
        if let Some(challenge) = params.challenge {
            tracing::info!("WhatsApp webhook verified successfully");
            return (StatusCode::OK, challenge);
        }
        return (StatusCode::BAD_REQUEST, "Missing hub.challenge".to_string());
    }

    tracing::warn!("WhatsApp webhook verification failed: token mismatch");
    (StatusCode::FORBIDDEN, "Forbidden".to_string())
}

/// POST /whatsapp: incoming message webhook.
///
/// Once the delivery is authenticated and parsed, the response is always
/// 200; Meta retries non-2xx deliveries, and a completion failure is not a
/// reason to see the same message again.
pub(super) async fn handle_whatsapp_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(ref wa) = state.whatsapp else {
        return whatsapp_not_configured_response();
    };

    if let Some(ref app_secret) = state.whatsapp_app_secret {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if !verify_webhook_signature(app_secret, &body, signature) {
            tracing::warn!(
                "WhatsApp webhook signature verification failed (signature: {})",
                if signature.is_empty() { "missing" } else { "invalid" }
            );
            return invalid_signature_response();
        }
    }

    let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return invalid_payload_response();
    };

    let messages = wa.parse_webhook_payload(&payload);

    if messages.is_empty() {
        // Status updates and non-text deliveries still need an ack
        return ack_response();
    }

    for msg in &messages {
        tracing::info!(
            "WhatsApp message from {}: {}",
            msg.sender,
            truncate_with_ellipsis(&msg.content, 50)
        );
        state
            .registry
            .note_contact(&msg.sender, msg.profile_name.as_deref())
            .await;

        let reply = reply_or_fallback(&state, &msg.sender, &msg.content).await;
        send_whatsapp_reply_or_log(wa, &msg.sender, &reply).await;
    }

    ack_response()
}

/// POST /webhook: channel-agnostic inbound message.
pub(super) async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<WebhookBody>, axum::extract::rejection::JsonRejection>,
) -> impl IntoResponse {
    if let Some(ref secret) = state.webhook_secret {
        let provided = headers
            .get("X-Webhook-Secret")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !constant_time_eq(provided, secret.as_ref()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Missing or invalid X-Webhook-Secret"})),
            );
        }
    }

    let Json(webhook_body) = match body {
        Ok(b) => b,
        Err(rejection) => {
            // axum reports missing fields as 422 and malformed JSON as 400
            return (
                rejection.status(),
                Json(serde_json::json!({"error": rejection.body_text()})),
            );
        }
    };

    if webhook_body.from.trim().is_empty() {
        return validation_response("'from' must not be empty");
    }
    if webhook_body.message.trim().is_empty() {
        return validation_response("'message' must not be empty");
    }

    let reply = reply_or_fallback(&state, &webhook_body.from, &webhook_body.message).await;
    (StatusCode::OK, Json(serde_json::json!({"reply": reply})))
}

/// POST /send: operator-initiated outbound message.
pub(super) async fn handle_send(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SendBody>, axum::extract::rejection::JsonRejection>,
) -> impl IntoResponse {
    let Some(ref wa) = state.whatsapp else {
        return whatsapp_not_configured_response();
    };

    if let Some(ref secret) = state.webhook_secret {
        let provided = headers
            .get("X-Webhook-Secret")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !constant_time_eq(provided, secret.as_ref()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Missing or invalid X-Webhook-Secret"})),
            );
        }
    }

    let Json(send_body) = match body {
        Ok(b) => b,
        Err(rejection) => {
            return (
                rejection.status(),
                Json(serde_json::json!({"error": rejection.body_text()})),
            );
        }
    };

    if send_body.to.trim().is_empty() {
        return validation_response("'to' must not be empty");
    }
    if send_body.message.trim().is_empty() {
        return validation_response("'message' must not be empty");
    }

    match wa.send(&send_body.to, &send_body.message).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "sent"}))),
        Err(TransportError::RecipientNotAllowed { to, .. }) => (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": format!("recipient {to} is not on the allowlist")})),
        ),
        Err(error) => {
            tracing::error!("outbound send failed: {error}");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({"error": "send failed"})),
            )
        }
    }
}
