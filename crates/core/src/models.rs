use serde::{Deserialize, Serialize};

/// Lineage carried by a document and inherited by every chunk cut from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentMetadata {
    /// File name of the PDF the text was extracted from.
    pub source: String,
    pub page_count: u32,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    #[serde(flatten)]
    pub document: DocumentMetadata,
    pub chunk_index: usize,
    pub chunk_count: usize,
}

impl ChunkMetadata {
    pub fn source(&self) -> &str {
        &self.document.source
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// One question/answer pair held in session history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceRef {
    pub source: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

/// Ranking function applied by [`crate::VectorIndex::search`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SearchStrategy {
    #[default]
    Similarity,
    Mmr { fetch_k: usize, lambda: f32 },
    SimilarityScoreThreshold { threshold: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_length: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_length: 512,
            temperature: 0.7,
            top_p: 0.95,
            repetition_penalty: 1.15,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkingOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
        }
    }
}
