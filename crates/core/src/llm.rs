use crate::error::GenerationError;
use crate::models::GenerationParams;
use crate::traits::Generator;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
    top_p: f32,
    repeat_penalty: f32,
}

impl From<&GenerationParams> for GenerateOptions {
    fn from(params: &GenerationParams) -> Self {
        Self {
            num_predict: params.max_length,
            temperature: params.temperature,
            top_p: params.top_p,
            repeat_penalty: params.repetition_penalty,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    name: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(default)]
    status: String,
}

/// Text generation through an Ollama server's `/api/generate` endpoint.
pub struct OllamaGenerator {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    /// Asks the server to download `name` into its model cache and waits for
    /// it to finish. Returns the final status line.
    pub async fn pull_model(&self, name: &str) -> Result<String, GenerationError> {
        let url = format!("{}/api/pull", self.endpoint);
        info!(model = %name, url = %url, "pulling model");

        let response = self
            .client
            .post(&url)
            .json(&PullRequest {
                name,
                stream: false,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api { status, body });
        }

        let parsed: PullResponse = response.json().await?;
        Ok(parsed.status)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.endpoint);
        debug!(url = %url, prompt_chars = prompt.len(), "generation request");

        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
                options: params.into(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api { status, body });
        }

        let parsed: GenerateResponse = response.json().await?;
        completion_text(parsed)
    }
}

fn completion_text(parsed: GenerateResponse) -> Result<String, GenerationError> {
    let answer = parsed.response.trim();
    if answer.is_empty() {
        return Err(GenerationError::EmptyCompletion);
    }
    Ok(answer.to_string())
}
