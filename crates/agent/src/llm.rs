use anyhow::{bail, Result};
use async_trait::async_trait;

/// One completion call. `system` carries the non-negotiable constraints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String>;
}

/// Used when no provider is configured; every reply falls back to templates.
#[derive(Clone, Debug, Default)]
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    async fn generate(&self, _request: GenerationRequest) -> Result<String> {
        bail!("text generation is disabled")
    }
}
