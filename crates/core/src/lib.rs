pub mod chat;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod service;
pub mod store;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_util;

pub use chat::{build_prompt, preview, ConversationEngine, ConversationHistory, EngineOptions};
pub use chunking::{RecursiveTextSplitter, DEFAULT_SEPARATORS};
pub use config::{EmbeddingBackend, Overrides, Quantization, SearchType, Settings};
pub use embeddings::{CharacterNgramEmbedder, Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{
    BuildError, ChatError, ConfigError, EmbeddingError, GenerationError, IndexError, IngestError,
};
pub use extractor::{extract_document, extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use ingest::{
    build_index, discover_pdf_files, load_documents, BuildSummary, ExtractionReport, SkippedPdf,
};
pub use llm::OllamaGenerator;
pub use models::{
    ChatResponse, Chunk, ChunkMetadata, ChunkingOptions, ConversationTurn, Document,
    DocumentMetadata, GenerationParams, ScoredChunk, SearchStrategy, SourceRef,
};
pub use service::{embedder_for, engine_options, generator_for, ChatService};
pub use store::{cosine_similarity, IndexEntry, IndexManifest, PersistentVectorStore};
pub use traits::{Generator, VectorIndex};
