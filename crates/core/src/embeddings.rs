use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

/// Turns text into fixed-length vectors. Batches are order-preserving and
/// each text is embedded independently of its neighbours.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier persisted with an index so it is never queried with
    /// vectors from a different model.
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text]).await?;
        match vectors.pop() {
            Some(vector) if vectors.is_empty() => Ok(vector),
            _ => Err(EmbeddingError::CountMismatch {
                expected: 1,
                actual: vectors.len() + 1,
            }),
        }
    }
}

/// Rejects a batch whose size or vector length disagrees with the request.
pub(crate) fn check_batch(
    vectors: &[Vec<f32>],
    expected_count: usize,
    dimensions: usize,
) -> Result<(), EmbeddingError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingError::CountMismatch {
            expected: expected_count,
            actual: vectors.len(),
        });
    }

    if let Some(bad) = vectors.iter().find(|vector| vector.len() != dimensions) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimensions,
            actual: bad.len(),
        });
    }

    Ok(())
}

/// Offline embedder hashing lower-cased character trigrams into buckets.
#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    dimensions: usize,
    model_id: String,
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model_id: format!("char-trigram-{dimensions}"),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedder backed by an Ollama server's `/api/embed` endpoint.
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.endpoint);
        debug!(url = %url, batch = texts.len(), "embedding request");

        let response = self
            .client
            .post(&url)
            .json(&OllamaEmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api(format!("{status}: {body}")));
        }

        let parsed: OllamaEmbedResponse = response.json().await?;
        check_batch(&parsed.embeddings, texts.len(), self.dimensions)?;
        Ok(parsed.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedder_is_deterministic() -> Result<(), EmbeddingError> {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow").await?;
        let second = embedder.embed("Hydraulic pressure and flow").await?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn embedder_outputs_expected_length() -> Result<(), EmbeddingError> {
        let embedder = CharacterNgramEmbedder::new(32);
        let vector = embedder.embed("abc").await?;
        assert_eq!(vector.len(), 32);
        assert_eq!(embedder.model_id(), "char-trigram-32");
        Ok(())
    }

    #[tokio::test]
    async fn batch_matches_individual_embeddings() -> Result<(), EmbeddingError> {
        let embedder = CharacterNgramEmbedder::new(64);
        let texts = ["clock rate 48 MHz", "supply voltage", "", "reset pin"];

        let batch = embedder.embed_batch(&texts).await?;
        assert_eq!(batch.len(), texts.len());
        for (text, vector) in texts.iter().zip(&batch) {
            assert_eq!(&embedder.embed(text).await?, vector);
        }
        Ok(())
    }

    #[test]
    fn batch_check_rejects_wrong_dimension() {
        let vectors = vec![vec![0.0; 4], vec![0.0; 3]];
        let result = check_batch(&vectors, 2, 4);
        assert!(matches!(
            result,
            Err(EmbeddingError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn batch_check_rejects_missing_vectors() {
        let vectors = vec![vec![0.0; 4]];
        let result = check_batch(&vectors, 2, 4);
        assert!(matches!(
            result,
            Err(EmbeddingError::CountMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn ollama_response_parses() -> Result<(), serde_json::Error> {
        let parsed: OllamaEmbedResponse =
            serde_json::from_str(r#"{"model":"all-minilm","embeddings":[[0.1,0.2],[0.3,0.4]]}"#)?;
        assert_eq!(parsed.embeddings.len(), 2);
        assert_eq!(parsed.embeddings[1], vec![0.3, 0.4]);
        Ok(())
    }
}
