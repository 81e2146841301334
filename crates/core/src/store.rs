use crate::embeddings::{check_batch, Embedder};
use crate::error::IndexError;
use crate::models::{Chunk, ScoredChunk, SearchStrategy};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const CURRENT_FILE: &str = "CURRENT";
const CURRENT_TMP_FILE: &str = "CURRENT.tmp";
const MANIFEST_FILE: &str = "manifest.json";
const ENTRIES_FILE: &str = "entries.json";
const GENERATION_PREFIX: &str = "index-";
const FORMAT_VERSION: u32 = 1;
const EMBED_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    pub format_version: u32,
    pub embedding_model: String,
    pub dimensions: usize,
    pub entry_count: usize,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// File-backed vector index. Each build writes a new generation directory
/// under the root and then repoints `CURRENT` at it, so a reader never sees a
/// half-written index.
pub struct PersistentVectorStore {
    location: PathBuf,
    manifest: IndexManifest,
    entries: Vec<IndexEntry>,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for PersistentVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentVectorStore")
            .field("location", &self.location)
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}

impl PersistentVectorStore {
    /// Embeds every chunk and persists the result under `root`, replacing
    /// whatever index was current there. Nothing is written unless every
    /// chunk embeds successfully.
    pub async fn build(
        root: &Path,
        embedder: Arc<dyn Embedder>,
        chunks: Vec<Chunk>,
    ) -> Result<Self, IndexError> {
        info!(root = %root.display(), chunk_count = chunks.len(), "building vector index");

        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<&str> = batch.iter().map(|chunk| chunk.content.as_str()).collect();
            let vectors = embedder.embed_batch(&texts).await?;
            check_batch(&vectors, texts.len(), embedder.dimensions())?;
            embeddings.extend(vectors);
        }

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();

        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            embedding_model: embedder.model_id().to_string(),
            dimensions: embedder.dimensions(),
            entry_count: entries.len(),
            built_at: Utc::now(),
        };

        fs::create_dir_all(root)?;
        let generation = format!("{GENERATION_PREFIX}{}", Uuid::new_v4().simple());
        let location = root.join(&generation);

        if let Err(error) = write_generation(&location, &manifest, &entries)
            .and_then(|()| swap_current(root, &generation))
        {
            if let Err(cleanup) = fs::remove_dir_all(&location) {
                warn!(path = %location.display(), error = %cleanup, "failed to remove partial index");
            }
            return Err(error);
        }

        remove_stale_generations(root, &generation);
        info!(
            location = %location.display(),
            entry_count = manifest.entry_count,
            model = %manifest.embedding_model,
            "vector index persisted"
        );

        Ok(Self {
            location,
            manifest,
            entries,
            embedder,
        })
    }

    /// Opens the current index under `root` without re-embedding anything.
    pub fn load(root: &Path, embedder: Arc<dyn Embedder>) -> Result<Self, IndexError> {
        let generation = match fs::read_to_string(root.join(CURRENT_FILE)) {
            Ok(name) => name.trim().to_string(),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(IndexError::NotFound(root.to_path_buf()))
            }
            Err(error) => return Err(IndexError::Io(error)),
        };

        if !generation.starts_with(GENERATION_PREFIX) || generation.contains(['/', '\\']) {
            return Err(IndexError::Corrupt(format!(
                "CURRENT points at unexpected entry {generation:?}"
            )));
        }

        let location = root.join(&generation);
        let manifest: IndexManifest = read_json(&location.join(MANIFEST_FILE), root)?;

        if manifest.embedding_model != embedder.model_id() {
            return Err(IndexError::ModelMismatch {
                expected: embedder.model_id().to_string(),
                found: manifest.embedding_model,
            });
        }

        let entries: Vec<IndexEntry> = read_json(&location.join(ENTRIES_FILE), root)?;
        validate_entries(&manifest, &entries, embedder.dimensions())?;

        info!(
            location = %location.display(),
            entry_count = entries.len(),
            built_at = %manifest.built_at.to_rfc3339(),
            "vector index loaded"
        );

        Ok(Self {
            location,
            manifest,
            entries,
            embedder,
        })
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    fn rank(&self, query_vector: &[f32], k: usize, strategy: SearchStrategy) -> Vec<ScoredChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, cosine_similarity(query_vector, &entry.embedding)))
            .collect();

        // sort_by is stable: equal scores keep insertion order.
        scored.sort_by(|left, right| right.1.total_cmp(&left.1));

        let selected = match strategy {
            SearchStrategy::Similarity => scored.into_iter().take(k).collect::<Vec<_>>(),
            SearchStrategy::SimilarityScoreThreshold { threshold } => scored
                .into_iter()
                .filter(|(_, score)| *score >= threshold)
                .take(k)
                .collect(),
            SearchStrategy::Mmr { fetch_k, lambda } => {
                let candidates = scored.into_iter().take(fetch_k.max(k)).collect::<Vec<_>>();
                mmr_select(&candidates, &self.entries, k, lambda)
            }
        };

        selected
            .into_iter()
            .map(|(position, score)| ScoredChunk {
                chunk: self.entries[position].chunk.clone(),
                score,
            })
            .collect()
    }
}

#[async_trait]
impl VectorIndex for PersistentVectorStore {
    fn len(&self) -> usize {
        self.entries.len()
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        strategy: SearchStrategy,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query).await?;
        Ok(self.rank(&query_vector, k, strategy))
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut left_norm = 0.0f32;
    let mut right_norm = 0.0f32;

    for (a, b) in left.iter().zip(right) {
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }

    dot / (left_norm.sqrt() * right_norm.sqrt())
}

/// Greedy maximal marginal relevance over `candidates`, which must already be
/// sorted by relevance. Scores in the result are query similarities.
fn mmr_select(
    candidates: &[(usize, f32)],
    entries: &[IndexEntry],
    k: usize,
    lambda: f32,
) -> Vec<(usize, f32)> {
    let lambda = lambda.clamp(0.0, 1.0);
    let mut remaining = candidates.to_vec();
    let mut selected: Vec<(usize, f32)> = Vec::with_capacity(k.min(remaining.len()));

    while selected.len() < k && !remaining.is_empty() {
        let mut best_position = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (position, (entry_position, relevance)) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|(chosen, _)| {
                    cosine_similarity(&entries[*entry_position].embedding, &entries[*chosen].embedding)
                })
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if selected.is_empty() { 0.0 } else { redundancy };

            let score = lambda * relevance - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_position = position;
            }
        }

        selected.push(remaining.remove(best_position));
    }

    selected
}

fn write_generation(
    location: &Path,
    manifest: &IndexManifest,
    entries: &[IndexEntry],
) -> Result<(), IndexError> {
    fs::create_dir_all(location)?;
    fs::write(location.join(ENTRIES_FILE), serde_json::to_vec(entries)?)?;
    fs::write(location.join(MANIFEST_FILE), serde_json::to_vec_pretty(manifest)?)?;
    Ok(())
}

fn swap_current(root: &Path, generation: &str) -> Result<(), IndexError> {
    let tmp = root.join(CURRENT_TMP_FILE);
    fs::write(&tmp, generation)?;
    fs::rename(&tmp, root.join(CURRENT_FILE))?;
    Ok(())
}

fn remove_stale_generations(root: &Path, keep: &str) {
    let listing = match fs::read_dir(root) {
        Ok(listing) => listing,
        Err(error) => {
            warn!(root = %root.display(), error = %error, "cannot list index generations");
            return;
        }
    };

    for entry in listing.filter_map(|item| item.ok()) {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(GENERATION_PREFIX) && name != keep {
            if let Err(error) = fs::remove_dir_all(entry.path()) {
                warn!(path = %entry.path().display(), error = %error, "failed to remove stale index");
            }
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, root: &Path) -> Result<T, IndexError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(IndexError::Corrupt(format!(
                "{} is missing from index at {}",
                path.display(),
                root.display()
            )))
        }
        Err(error) => return Err(IndexError::Io(error)),
    };
    Ok(serde_json::from_slice(&bytes)?)
}

fn validate_entries(
    manifest: &IndexManifest,
    entries: &[IndexEntry],
    dimensions: usize,
) -> Result<(), IndexError> {
    if manifest.format_version != FORMAT_VERSION {
        return Err(IndexError::Corrupt(format!(
            "unsupported index format version {}",
            manifest.format_version
        )));
    }
    if manifest.entry_count != entries.len() {
        return Err(IndexError::Corrupt(format!(
            "manifest lists {} entries, found {}",
            manifest.entry_count,
            entries.len()
        )));
    }
    if manifest.dimensions != dimensions {
        return Err(IndexError::Corrupt(format!(
            "index dimension {} differs from embedder dimension {dimensions}",
            manifest.dimensions
        )));
    }
    if let Some(entry) = entries.iter().find(|entry| entry.embedding.len() != dimensions) {
        return Err(IndexError::Corrupt(format!(
            "entry from {} has {} dimensions",
            entry.chunk.metadata.source(),
            entry.embedding.len()
        )));
    }
    Ok(())
}
