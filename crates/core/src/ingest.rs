use crate::chunking::RecursiveTextSplitter;
use crate::config::Settings;
use crate::embeddings::Embedder;
use crate::error::{BuildError, IngestError};
use crate::extractor::{extract_document, PdfExtractor};
use crate::models::Document;
use crate::store::PersistentVectorStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

/// PDF files directly inside `folder` (`.pdf` in any case), ordered by name.
pub fn discover_pdf_files(folder: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !folder.is_dir() {
        return Err(IngestError::MissingDirectory(folder.to_path_buf()));
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    Ok(files)
}

#[derive(Debug)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedPdf>,
}

/// Extracts every PDF in `folder`. A file that cannot be opened or parsed is
/// logged and recorded in `skipped`; only a missing folder fails the batch.
pub fn load_documents(
    folder: &Path,
    extractor: &dyn PdfExtractor,
) -> Result<ExtractionReport, IngestError> {
    let files = discover_pdf_files(folder)?;
    info!(folder = %folder.display(), pdf_count = files.len(), "found pdf files to process");

    let mut report = ExtractionReport::default();

    for path in files {
        match extract_document(extractor, &path) {
            Ok(document) => {
                info!(
                    source = %document.metadata.source,
                    pages = document.metadata.page_count,
                    "processed pdf"
                );
                report.documents.push(document);
            }
            Err(error) => {
                warn!(path = %path.display(), reason = %error, "skipped pdf");
                report.skipped.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(report)
}

#[derive(Debug)]
pub struct BuildSummary {
    pub documents: usize,
    pub chunks: usize,
    pub skipped: Vec<SkippedPdf>,
    pub location: PathBuf,
}

/// Extract, chunk, embed and persist the PDFs in `pdf_dir` into
/// `settings.vector_store_dir`, replacing the current index there.
pub async fn build_index(
    settings: &Settings,
    pdf_dir: &Path,
    extractor: &dyn PdfExtractor,
    embedder: Arc<dyn Embedder>,
) -> Result<(PersistentVectorStore, BuildSummary), BuildError> {
    let splitter = RecursiveTextSplitter::new(settings.chunking_options())?;

    info!(
        pdf_dir = %pdf_dir.display(),
        chunk_size = settings.chunk_size,
        chunk_overlap = settings.chunk_overlap,
        "building vector index from pdfs"
    );

    let report = load_documents(pdf_dir, extractor)?;
    let chunks = splitter.split_documents(&report.documents);
    info!(documents = report.documents.len(), chunks = chunks.len(), "created document chunks");

    let chunk_count = chunks.len();
    let store = PersistentVectorStore::build(&settings.vector_store_dir, embedder, chunks).await?;

    let summary = BuildSummary {
        documents: report.documents.len(),
        chunks: chunk_count,
        skipped: report.skipped,
        location: store.location().to_path_buf(),
    };

    Ok((store, summary))
}
