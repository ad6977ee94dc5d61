pub mod json_repair;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// Minimal text-in/text-out boundary. A concrete HTTP or local-model
/// binding implements this; it is out of scope for this crate.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn invoke(&self, prompt: &str) -> Result<String>;

    /// Optional streaming variant; providers that can't stream return a
    /// single-chunk stream wrapping `invoke`'s result.
    async fn invoke_stream(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        let text = self.invoke(prompt).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }
}
