use async_trait::async_trait;

use crate::error::GatewayError;
use crate::session::ChatMessage;

/// External text-generation service.
///
/// Given the process-wide system instruction and a bounded conversation
/// history (oldest first, ending with the latest user message), produce the
/// next assistant reply. Generation parameters are fixed at construction;
/// nothing is negotiated per call.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
    ) -> Result<String, GatewayError>;
}
