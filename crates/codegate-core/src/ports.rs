use async_trait::async_trait;

use crate::Result;

/// Shown to the user when the completion provider fails.
pub const FALLBACK_REPLY: &str = "Sorry, something went wrong while processing your message.";

/// Hexagonal port for the external text-completion provider.
///
/// Callers must only invoke this after the gateway admitted the request.
#[async_trait]
pub trait CompletionPort: Send + Sync {
    async fn complete(&self, text: &str) -> Result<String>;
}
