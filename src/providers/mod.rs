pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::CompletionConfig;
use crate::error::{ConfigError, Result};

pub use openai::OpenAiBackend;
pub use traits::CompletionBackend;

/// Build the configured completion backend. Fails fast when no API key is
/// available, so a misconfigured relay refuses to start instead of failing
/// on every inbound message.
pub fn create_backend(config: &CompletionConfig) -> Result<Arc<dyn CompletionBackend>> {
    let api_key = config.api_key.as_deref().filter(|k| !k.is_empty()).ok_or_else(|| {
        ConfigError::Validation(
            "completion.api_key is not set (or export PALAVER_OPENAI_API_KEY)".into(),
        )
    })?;
    Ok(Arc::new(OpenAiBackend::new(config, api_key)))
}
