use crate::error::{GenerationError, IndexError};
use crate::models::{GenerationParams, ScoredChunk, SearchStrategy};
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns at most `k` chunks ranked most-relevant first. An index holding
    /// fewer than `k` entries returns what it has.
    async fn search(
        &self,
        query: &str,
        k: usize,
        strategy: SearchStrategy,
    ) -> Result<Vec<ScoredChunk>, IndexError>;
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_id(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError>;
}
