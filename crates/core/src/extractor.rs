use crate::error::IngestError;
use crate::models::{Document, DocumentMetadata};
use sha2::{Digest, Sha256};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document = lopdf::Document::load(path)
            .map_err(|error| IngestError::PdfParse(format!("{}: {error}", path.display())))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(format!("{}: {error}", path.display())))?;

            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        Ok(pages)
    }
}

pub fn extract_page_texts(path: &Path) -> Result<Vec<PageText>, IngestError> {
    LopdfExtractor.extract_pages(path)
}

/// Reads one PDF into a [`Document`]. Pages are joined in page order, each
/// followed by a newline; a PDF without a text layer yields blank content
/// rather than an error.
pub fn extract_document(
    extractor: &dyn PdfExtractor,
    path: &Path,
) -> Result<Document, IngestError> {
    let source = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
        .to_string();

    let checksum = digest_file(path)?;
    let pages = extractor.extract_pages(path)?;

    let mut content = String::new();
    for page in &pages {
        content.push_str(&page.text);
        content.push('\n');
    }

    Ok(Document {
        content,
        metadata: DocumentMetadata {
            source,
            page_count: pages.len() as u32,
            checksum,
        },
    })
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::write_text_pdf;
    use tempfile::tempdir;

    #[test]
    fn pages_are_joined_with_newlines() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("spec.pdf");
        write_text_pdf(&path, &["Clock rate is 48 MHz", "Supply voltage is 3.3 V"])?;

        let document = extract_document(&LopdfExtractor, &path)?;

        assert_eq!(document.metadata.source, "spec.pdf");
        assert_eq!(document.metadata.page_count, 2);
        assert!(document.content.contains("Clock rate is 48 MHz"));
        assert!(document.content.contains("Supply voltage is 3.3 V"));
        let first = document.content.find("Clock").unwrap_or(usize::MAX);
        let second = document.content.find("Supply").unwrap_or(0);
        assert!(first < second);
        assert!(document.content.ends_with('\n'));
        Ok(())
    }

    #[test]
    fn corrupt_pdf_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%broken")?;

        let result = extract_document(&LopdfExtractor, &path);
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file_path = dir.path().join("a.pdf");
        std::fs::write(&file_path, b"abc")?;

        let first = digest_file(&file_path)?;
        let second = digest_file(&file_path)?;
        assert_eq!(first, second);
        Ok(())
    }
}
