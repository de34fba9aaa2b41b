use std::fs;
use std::path::{Path, PathBuf};

use directories::UserDirs;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::session::SessionConfig;

/// Default persona for the relay: a terse data-engineering assistant.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a concise data engineering expert assistant.

Your role:
- Provide short, practical answers about data engineering topics
- Focus on: data pipelines, ETL/ELT, data warehousing, SQL, Python, Apache Spark, Airflow, dbt, data modeling, and cloud platforms (AWS, GCP, Azure)
- Keep responses brief and to the point (2-3 sentences max for a question)
- Use bullet points for clarity when listing multiple items
- Provide code examples only when specifically requested
- If a topic requires more detail, offer to elaborate

Guidelines:
- Be direct and actionable
- Avoid unnecessary explanations
- Prioritize practical solutions over theory
- If you don't know something, say so briefly

Remember: The user values brevity and expertise.";

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Path this config was loaded from - computed, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

// ── Completion backend ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// OpenAI-compatible API root. Overridable for self-hosted gateways
    /// and for tests.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Prefer `PALAVER_OPENAI_API_KEY` (or `OPENAI_API_KEY`) over storing
    /// the key in the file.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// System instruction supplied fresh on every completion call. Never
    /// stored in the bounded history.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_temperature() -> f64 {
    0.3
}

fn default_max_tokens() -> u32 {
    500
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".into()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.into()
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_base: default_api_base(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            system_prompt: default_system_prompt(),
        }
    }
}

// ── Durable transcript storage ────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "memory" keeps transcripts in-process only; "sqlite" mirrors them
    /// to a durable database.
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "~/.palaver/palaver.db".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            db_path: default_db_path(),
        }
    }
}

impl StorageConfig {
    /// `db_path` with `~` expanded.
    #[must_use]
    pub fn resolved_db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).into_owned())
    }
}

// ── HTTP gateway ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,

    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Shared secret required (as `X-Webhook-Secret`) on the generic
    /// webhook and send endpoints. Unset disables the check.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Interval between eviction sweeps of expired sessions.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    8000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            webhook_secret: None,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

// ── WhatsApp channel ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub access_token: String,

    #[serde(default)]
    pub phone_number_id: String,

    /// Token echoed back during Meta's webhook verification handshake.
    #[serde(default)]
    pub verify_token: String,

    /// App secret for `X-Hub-Signature-256` verification. Unset skips the
    /// signature check.
    #[serde(default)]
    pub app_secret: Option<String>,

    /// E.164 numbers allowed to talk to the relay; `"*"` allows everyone.
    /// An empty list denies all senders.
    #[serde(default)]
    pub allowed_numbers: Vec<String>,

    /// Graph API root. Overridable for tests.
    #[serde(default = "default_graph_api_base")]
    pub api_base: String,
}

fn default_graph_api_base() -> String {
    "https://graph.facebook.com/v18.0".into()
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            access_token: String::new(),
            phone_number_id: String::new(),
            verify_token: String::new(),
            app_secret: None,
            allowed_numbers: Vec::new(),
            api_base: default_graph_api_base(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────

impl Config {
    /// Load configuration from `explicit_path`, or from
    /// `~/.palaver/config.toml` when no path is given. A missing default
    /// file yields the built-in defaults; a missing explicit file is an
    /// error. Environment overrides are applied after parsing; the result
    /// is validated before use.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit_path {
            Some(path) => {
                let contents = fs::read_to_string(path).map_err(|e| {
                    ConfigError::Load(format!("{}: {e}", path.display()))
                })?;
                let mut config: Config = toml::from_str(&contents)
                    .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
                config.config_path = path.to_path_buf();
                config
            }
            None => {
                let path = Self::default_path();
                match path.as_deref().map(fs::read_to_string) {
                    Some(Ok(contents)) => {
                        let mut config: Config = toml::from_str(&contents).map_err(|e| {
                            ConfigError::Load(format!("default config: {e}"))
                        })?;
                        if let Some(p) = path {
                            config.config_path = p;
                        }
                        config
                    }
                    _ => Config::default(),
                }
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn default_path() -> Option<PathBuf> {
        UserDirs::new().map(|u| u.home_dir().join(".palaver").join("config.toml"))
    }

    /// Environment variables take precedence over file values for secrets
    /// and bind address, so deployments can keep credentials out of the
    /// config file entirely.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("PALAVER_OPENAI_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
        {
            if !key.is_empty() {
                self.completion.api_key = Some(key);
            }
        }

        if let Ok(token) = std::env::var("PALAVER_WHATSAPP_ACCESS_TOKEN") {
            if !token.is_empty() {
                self.whatsapp.access_token = token;
            }
        }

        if let Ok(secret) = std::env::var("PALAVER_WHATSAPP_APP_SECRET") {
            if !secret.is_empty() {
                self.whatsapp.app_secret = Some(secret);
            }
        }

        if let Ok(secret) = std::env::var("PALAVER_WEBHOOK_SECRET") {
            if !secret.is_empty() {
                self.gateway.webhook_secret = Some(secret);
            }
        }

        if let Ok(host) = std::env::var("PALAVER_HOST") {
            if !host.is_empty() {
                self.gateway.host = host;
            }
        }

        if let Ok(port_str) = std::env::var("PALAVER_PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                self.gateway.port = port;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(ConfigError::Validation(format!(
                "completion.temperature must be within 0.0..=2.0 (got {})",
                self.completion.temperature
            )));
        }
        if self.completion.max_tokens == 0 {
            return Err(ConfigError::Validation(
                "completion.max_tokens must be positive".into(),
            ));
        }
        if self.completion.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "completion.request_timeout_secs must be positive".into(),
            ));
        }
        Self::validate_http_url("completion.api_base", &self.completion.api_base)?;
        Self::validate_http_url("whatsapp.api_base", &self.whatsapp.api_base)?;

        if self.session.max_history == 0 {
            return Err(ConfigError::Validation(
                "session.max_history must be at least 1".into(),
            ));
        }
        if self.session.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "session.timeout_secs must be positive".into(),
            ));
        }
        if self.session.reset_keywords.is_empty() {
            return Err(ConfigError::Validation(
                "session.reset_keywords must not be empty".into(),
            ));
        }

        if self.whatsapp.enabled {
            if self.whatsapp.access_token.is_empty() {
                return Err(ConfigError::Validation(
                    "whatsapp.access_token is required when whatsapp.enabled".into(),
                ));
            }
            if self.whatsapp.phone_number_id.is_empty() {
                return Err(ConfigError::Validation(
                    "whatsapp.phone_number_id is required when whatsapp.enabled".into(),
                ));
            }
            if self.whatsapp.verify_token.is_empty() {
                return Err(ConfigError::Validation(
                    "whatsapp.verify_token is required when whatsapp.enabled".into(),
                ));
            }
        }

        if self.storage.backend == StorageBackend::Sqlite && self.storage.db_path.is_empty() {
            return Err(ConfigError::Validation(
                "storage.db_path is required for the sqlite backend".into(),
            ));
        }

        Ok(())
    }

    fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
        let url = Url::parse(value)
            .map_err(|e| ConfigError::Validation(format!("{field} is not a valid URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "{field} must use http or https (got {})",
                url.scheme()
            )));
        }
        Ok(())
    }
}
