use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::CompletionConfig;
use crate::error::GatewayError;
use crate::session::{ChatMessage, MessageRole};
use crate::util::truncate_with_ellipsis;

use super::traits::CompletionBackend;

const MAX_API_ERROR_CHARS: usize = 300;

/// OpenAI-compatible chat-completions backend.
///
/// Model, temperature, and token limit are fixed from configuration; the
/// base URL is injectable so tests can point it at a local mock server.
pub struct OpenAiBackend {
    /// Pre-computed `"Bearer <key>"` header value (avoids `format!` per request).
    cached_auth_header: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    request_timeout: Duration,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

fn wire_role(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    }
}

impl OpenAiBackend {
    pub fn new(config: &CompletionConfig, api_key: &str) -> Self {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        Self {
            cached_auth_header: format!("Bearer {api_key}"),
            base_url: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            request_timeout,
            client: Client::builder()
                .timeout(request_timeout)
                .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
                .pool_max_idle_per_host(10)
                .pool_idle_timeout(Duration::from_secs(90))
                .tcp_keepalive(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn build_request(&self, system_prompt: &str, history: &[ChatMessage]) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: system_prompt.to_string(),
        });
        for msg in history {
            messages.push(WireMessage {
                role: wire_role(msg.role),
                content: msg.content.clone(),
            });
        }
        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    fn extract_text(chat_response: ChatResponse) -> Result<String, GatewayError> {
        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.is_empty())
            .ok_or(GatewayError::Empty)
    }

    fn map_transport_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(self.request_timeout)
        } else {
            GatewayError::Http(err)
        }
    }

    /// Build a typed provider error from a failed HTTP response, with the
    /// body truncated so oversized error pages stay out of the logs.
    async fn api_error(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            return GatewayError::RateLimited { retry_after_secs };
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read provider error body>".to_string());
        GatewayError::Api {
            status: status.as_u16(),
            message: truncate_with_ellipsis(&body, MAX_API_ERROR_CHARS),
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
    ) -> Result<String, GatewayError> {
        let request = self.build_request(system_prompt, history);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header(reqwest::header::AUTHORIZATION, &self.cached_auth_header)
            .json(&request)
            .send()
            .await
            .map_err(|err| self.map_transport_error(err))?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|err| self.map_transport_error(err))?;
        Self::extract_text(chat_response)
    }
}
