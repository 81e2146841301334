use crate::chat::{ConversationEngine, EngineOptions};
use crate::config::{EmbeddingBackend, Settings};
use crate::embeddings::{CharacterNgramEmbedder, Embedder, OllamaEmbedder};
use crate::error::{BuildError, ChatError, EmbeddingError, GenerationError, IndexError};
use crate::extractor::LopdfExtractor;
use crate::ingest::{build_index, BuildSummary};
use crate::llm::OllamaGenerator;
use crate::models::ChatResponse;
use crate::store::PersistentVectorStore;
use crate::traits::{Generator, VectorIndex};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub fn embedder_for(settings: &Settings) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    let embedder: Arc<dyn Embedder> = match settings.embedding_backend {
        EmbeddingBackend::Ollama => Arc::new(OllamaEmbedder::new(
            &settings.llm_endpoint,
            &settings.embedding_model,
            settings.embedding_dimensions,
            settings.request_timeout(),
        )?),
        EmbeddingBackend::Ngram => Arc::new(CharacterNgramEmbedder::new(settings.embedding_dimensions)),
    };
    info!(model = %embedder.model_id(), dimensions = embedder.dimensions(), "embedder ready");
    Ok(embedder)
}

pub fn generator_for(settings: &Settings) -> Result<OllamaGenerator, GenerationError> {
    OllamaGenerator::new(
        &settings.llm_endpoint,
        settings.resolved_model_name(),
        settings.request_timeout(),
    )
}

pub fn engine_options(settings: &Settings) -> EngineOptions {
    EngineOptions {
        retriever_k: settings.retriever_k,
        strategy: settings.search_strategy(),
        generation: settings.generation_params(),
        return_sources: settings.return_source_docs,
    }
}

/// What a front end talks to: ask questions, forget the conversation, or
/// rebuild the index from a PDF folder without dropping the session.
pub struct ChatService<G: Generator> {
    settings: Settings,
    embedder: Arc<dyn Embedder>,
    engine: ConversationEngine<G, PersistentVectorStore>,
}

impl<G: Generator> ChatService<G> {
    /// Opens the index already persisted at `settings.vector_store_dir`.
    pub fn open(
        settings: Settings,
        generator: G,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, IndexError> {
        let index = PersistentVectorStore::load(&settings.vector_store_dir, embedder.clone())?;
        Ok(Self::with_index(settings, generator, embedder, index))
    }

    /// Builds a fresh index from `pdf_dir` (or the configured folder) first.
    pub async fn build(
        settings: Settings,
        generator: G,
        embedder: Arc<dyn Embedder>,
        pdf_dir: Option<&Path>,
    ) -> Result<(Self, BuildSummary), BuildError> {
        let pdf_dir = pdf_dir.unwrap_or(settings.pdf_dir.as_path()).to_path_buf();
        let (index, summary) =
            build_index(&settings, &pdf_dir, &LopdfExtractor, embedder.clone()).await?;
        Ok((Self::with_index(settings, generator, embedder, index), summary))
    }

    fn with_index(
        settings: Settings,
        generator: G,
        embedder: Arc<dyn Embedder>,
        index: PersistentVectorStore,
    ) -> Self {
        let engine = ConversationEngine::new(generator, index, engine_options(&settings));
        Self {
            settings,
            embedder,
            engine,
        }
    }

    pub async fn ask(&mut self, question: &str) -> Result<ChatResponse, ChatError> {
        self.engine.ask(question).await
    }

    pub fn clear_history(&mut self) {
        self.engine.clear();
    }

    /// Rebuilds the persisted index and switches to it only once the build
    /// succeeded; on failure the current index stays live.
    pub async fn rebuild(&mut self, pdf_dir: Option<&Path>) -> Result<BuildSummary, BuildError> {
        let pdf_dir = pdf_dir.unwrap_or(self.settings.pdf_dir.as_path()).to_path_buf();
        let (index, summary) =
            build_index(&self.settings, &pdf_dir, &LopdfExtractor, self.embedder.clone()).await?;
        self.engine.replace_index(index);
        info!(chunks = summary.chunks, location = %summary.location.display(), "switched to rebuilt index");
        Ok(summary)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn indexed_chunks(&self) -> usize {
        self.engine.index().len()
    }

    pub fn history_len(&self) -> usize {
        self.engine.history().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GenerationParams;
    use crate::test_util::write_text_pdf;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::tempdir;

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        fn model_id(&self) -> &str {
            "echo"
        }

        async fn generate(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<String, GenerationError> {
            Ok(format!("answered from {} prompt chars", prompt.len()))
        }
    }

    fn offline_settings(pdf_dir: &Path, store_dir: &Path) -> Settings {
        Settings {
            embedding_backend: EmbeddingBackend::Ngram,
            embedding_dimensions: 128,
            retriever_k: 1,
            pdf_dir: pdf_dir.to_path_buf(),
            vector_store_dir: store_dir.to_path_buf(),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn clock_rate_question_cites_the_spec() -> Result<(), Box<dyn std::error::Error>> {
        let pdfs = tempdir()?;
        let store = tempdir()?;
        write_text_pdf(
            &pdfs.path().join("spec.pdf"),
            &["The core clock rate is 48 MHz after reset."],
        )?;
        write_text_pdf(
            &pdfs.path().join("gpio.pdf"),
            &["GPIO pins tolerate 5 V when configured as inputs."],
        )?;

        let settings = offline_settings(pdfs.path(), store.path());
        let embedder = embedder_for(&settings)?;
        let (mut service, summary) = ChatService::build(settings, EchoGenerator, embedder, None).await?;
        assert_eq!(summary.documents, 2);

        let response = service.ask("What is the clock rate?").await?;
        assert!(!response.answer.is_empty());
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].source, "spec.pdf");
        Ok(())
    }

    #[tokio::test]
    async fn open_requires_a_persisted_index() -> Result<(), Box<dyn std::error::Error>> {
        let pdfs = tempdir()?;
        let store = tempdir()?;
        let settings = offline_settings(pdfs.path(), store.path());
        let embedder = embedder_for(&settings)?;

        let result = ChatService::open(settings, EchoGenerator, embedder);
        assert!(matches!(result, Err(IndexError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn rebuild_swaps_index_and_keeps_history() -> Result<(), Box<dyn std::error::Error>> {
        let pdfs = tempdir()?;
        let more_pdfs = tempdir()?;
        let store = tempdir()?;
        write_text_pdf(&pdfs.path().join("spec.pdf"), &["The core clock rate is 48 MHz."])?;
        write_text_pdf(&more_pdfs.path().join("a.pdf"), &["UART baud rates reach 3 Mbit/s."])?;
        write_text_pdf(&more_pdfs.path().join("b.pdf"), &["Flash endurance is 10k cycles."])?;

        let settings = offline_settings(pdfs.path(), store.path());
        let embedder = embedder_for(&settings)?;
        let (mut service, _) = ChatService::build(settings, EchoGenerator, embedder, None).await?;
        service.ask("What is the clock rate?").await?;
        assert_eq!(service.indexed_chunks(), 1);

        let summary = service.rebuild(Some(more_pdfs.path())).await?;
        assert_eq!(summary.documents, 2);
        assert_eq!(service.indexed_chunks(), 2);
        assert_eq!(service.history_len(), 1);

        let failed = service.rebuild(Some(pdfs.path().join("missing").as_path())).await;
        assert!(failed.is_err());
        assert_eq!(service.indexed_chunks(), 2);

        service.clear_history();
        assert_eq!(service.history_len(), 0);
        assert!(fs::read_to_string(store.path().join("CURRENT"))?.starts_with("index-"));
        Ok(())
    }
}
