use std::collections::HashMap;

use serde_json::Value;

use super::chunker::chunk_message;
use crate::config::WhatsAppConfig;
use crate::error::TransportError;

/// WhatsApp Business Cloud API text messages top out at 4096 characters.
const MAX_TEXT_CHARS: usize = 4096;

/// One text message lifted out of a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender in E.164 form with a leading `+`.
    pub sender: String,
    pub content: String,
    /// Profile name Meta attached to the delivery, when present.
    pub profile_name: Option<String>,
    pub timestamp: u64,
}

/// WhatsApp Business Cloud API channel.
///
/// Operates in webhook mode: Meta pushes deliveries to the gateway's
/// `/whatsapp` endpoint, and replies go out through the Graph API here.
pub struct WhatsAppChannel {
    access_token: String,
    phone_number_id: String,
    verify_token: String,
    allowed_numbers: Vec<String>,
    api_base: String,
    client: reqwest::Client,
}

impl WhatsAppChannel {
    #[must_use]
    pub fn new(config: &WhatsAppConfig) -> Self {
        Self {
            access_token: config.access_token.clone(),
            phone_number_id: config.phone_number_id.clone(),
            verify_token: config.verify_token.clone(),
            allowed_numbers: config.allowed_numbers.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Check if a phone number is allowed (E.164 format: +1234567890).
    /// An empty allowlist denies everyone; `"*"` allows everyone.
    #[must_use]
    pub fn is_number_allowed(&self, phone: &str) -> bool {
        self.allowed_numbers.iter().any(|n| n == "*" || n == phone)
    }

    /// Token Meta must echo during the webhook verification handshake.
    #[must_use]
    pub fn verify_token(&self) -> &str {
        &self.verify_token
    }

    /// Parse an incoming webhook payload from Meta and extract the text
    /// messages from allowed senders.
    ///
    /// Non-text messages, empty bodies, status deliveries, and senders not
    /// on the allowlist are skipped. Senders are normalized to a leading
    /// `+`, matching the registry's identity keys.
    #[must_use]
    pub fn parse_webhook_payload(&self, payload: &Value) -> Vec<InboundMessage> {
        let mut messages = Vec::new();

        // Cloud API webhook structure:
        // { "object": "whatsapp_business_account", "entry": [...] }
        let Some(entries) = payload.get("entry").and_then(|e| e.as_array()) else {
            return messages;
        };

        for entry in entries {
            let Some(changes) = entry.get("changes").and_then(|c| c.as_array()) else {
                continue;
            };

            for change in changes {
                let Some(value) = change.get("value") else {
                    continue;
                };

                let profiles = profile_names(value);

                let Some(msgs) = value.get("messages").and_then(|m| m.as_array()) else {
                    continue;
                };

                for msg in msgs {
                    let Some(from) = msg.get("from").and_then(|f| f.as_str()) else {
                        continue;
                    };

                    let sender = normalize_number(from);

                    if !self.is_number_allowed(&sender) {
                        tracing::warn!(
                            "whatsapp: ignoring message from unauthorized number {sender}; \
                             add it to whatsapp.allowed_numbers to accept"
                        );
                        continue;
                    }

                    let Some(content) = msg
                        .get("text")
                        .and_then(|t| t.get("body"))
                        .and_then(|b| b.as_str())
                    else {
                        tracing::debug!("whatsapp: skipping non-text message from {sender}");
                        continue;
                    };

                    if content.is_empty() {
                        continue;
                    }

                    let timestamp = msg
                        .get("timestamp")
                        .and_then(|t| t.as_str())
                        .and_then(|t| t.parse::<u64>().ok())
                        .unwrap_or_else(unix_now);

                    messages.push(InboundMessage {
                        sender: sender.clone(),
                        content: content.to_string(),
                        profile_name: profiles.get(from).cloned(),
                        timestamp,
                    });
                }
            }
        }

        messages
    }

    /// Deliver `body` to `recipient`, splitting into multiple messages when
    /// it exceeds the platform's text cap.
    pub async fn send(&self, recipient: &str, body: &str) -> Result<(), TransportError> {
        if !self.is_number_allowed(recipient) {
            return Err(TransportError::RecipientNotAllowed {
                channel: "whatsapp".into(),
                to: recipient.to_string(),
            });
        }

        for chunk in chunk_message(body, MAX_TEXT_CHARS) {
            self.send_text(recipient, &chunk).await?;
        }
        Ok(())
    }

    async fn send_text(&self, recipient: &str, body: &str) -> Result<(), TransportError> {
        let url = format!("{}/{}/messages", self.api_base, self.phone_number_id);

        // Graph API wants the number without the leading +.
        let to = recipient.strip_prefix('+').unwrap_or(recipient);

        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": body
            }
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .json(&payload)
            .send()
            .await
            .map_err(|e| TransportError::Send {
                channel: "whatsapp".into(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!("whatsapp send failed: {status}: {error_body}");
            return Err(TransportError::Send {
                channel: "whatsapp".into(),
                message: format!("graph api returned {status}"),
            });
        }

        Ok(())
    }
}

fn normalize_number(raw: &str) -> String {
    if raw.starts_with('+') {
        raw.to_string()
    } else {
        format!("+{raw}")
    }
}

/// Map of raw `wa_id` to profile name from the delivery's `contacts` block.
fn profile_names(value: &Value) -> HashMap<String, String> {
    let mut names = HashMap::new();

    let Some(contacts) = value.get("contacts").and_then(|c| c.as_array()) else {
        return names;
    };

    for contact in contacts {
        let Some(wa_id) = contact.get("wa_id").and_then(|w| w.as_str()) else {
            continue;
        };
        if let Some(name) = contact
            .get("profile")
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
        {
            names.insert(wa_id.to_string(), name.to_string());
        }
    }

    names
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
