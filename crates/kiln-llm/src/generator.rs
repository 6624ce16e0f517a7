//! The generation capability seam.

use crate::error::LlmResult;
use crate::types::{GenerationRequest, GenerationResponse};
use async_trait::async_trait;

/// Anything that can turn a chat request into text.
///
/// Implementations must be safe to share between concurrent pipeline runs.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn invoke(&self, request: GenerationRequest) -> LlmResult<GenerationResponse>;
}
