//! Loading source files into [`Document`]s.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::document::{Document, PAGE_KEY, SOURCE_KEY};
use crate::error::{RagError, Result};

/// Turns one file into zero or more documents.
pub trait DocumentLoader: Send + Sync {
    /// Lower-case file extensions this loader handles, without the dot.
    fn extensions(&self) -> &[&str];

    /// Load `path`. An error skips the file; it never aborts an ingest run.
    fn load(&self, path: &Path) -> Result<Vec<Document>>;
}

fn file_label(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn metadata_for(path: &Path, page: Option<u32>) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert(SOURCE_KEY.to_string(), path.display().to_string());
    if let Some(page) = page {
        metadata.insert(PAGE_KEY.to_string(), page.to_string());
    }
    metadata
}

/// Extracts text from PDFs with `lopdf`, one [`Document`] per non-empty page.
///
/// Documents from the same file share the `source` metadata and carry a
/// 1-based `page`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfLoader;

impl DocumentLoader for PdfLoader {
    fn extensions(&self) -> &[&str] {
        &["pdf"]
    }

    fn load(&self, path: &Path) -> Result<Vec<Document>> {
        let pdf = lopdf::Document::load(path).map_err(|e| RagError::Ingestion {
            path: path.to_path_buf(),
            message: format!("failed to parse PDF: {e}"),
        })?;
        if pdf.is_encrypted() {
            return Err(RagError::Ingestion {
                path: path.to_path_buf(),
                message: "PDF is encrypted".to_string(),
            });
        }

        let label = file_label(path);
        let mut documents = Vec::new();
        for page in pdf.get_pages().into_keys() {
            let text = match pdf.extract_text(&[page]) {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), page, error = %e, "skipping unreadable page");
                    continue;
                }
            };
            if text.trim().is_empty() {
                debug!(path = %path.display(), page, "page has no extractable text");
                continue;
            }
            documents.push(Document {
                id: format!("{label}#p{page}"),
                text,
                metadata: metadata_for(path, Some(page)),
            });
        }

        if documents.is_empty() {
            return Err(RagError::Ingestion {
                path: path.to_path_buf(),
                message: "no extractable text (the PDF may be image-based)".to_string(),
            });
        }
        Ok(documents)
    }
}

/// Loads `.txt` and `.md` files as a single document each.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextLoader;

impl DocumentLoader for TextLoader {
    fn extensions(&self) -> &[&str] {
        &["txt", "md"]
    }

    fn load(&self, path: &Path) -> Result<Vec<Document>> {
        let text = fs::read_to_string(path).map_err(|e| RagError::Ingestion {
            path: path.to_path_buf(),
            message: format!("failed to read text: {e}"),
        })?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Document { id: file_label(path), text, metadata: metadata_for(path, None) }])
    }
}

/// Outcome of an ingest run.
#[derive(Debug, Default, Clone)]
pub struct IngestReport {
    /// Documents loaded, in file order then page order.
    pub documents: Vec<Document>,
    /// Files with a recognised extension that were attempted.
    pub files_seen: usize,
    /// Files that were skipped, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

impl IngestReport {
    /// Whether nothing was loaded.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Reads every recognised file directly inside a source directory.
pub struct DocumentIngester {
    loaders: Vec<Box<dyn DocumentLoader>>,
}

impl Default for DocumentIngester {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentIngester {
    /// An ingester for PDFs and plain text.
    pub fn new() -> Self {
        Self { loaders: vec![Box::new(PdfLoader), Box::new(TextLoader)] }
    }

    /// Register another loader. Later loaders never shadow earlier ones for the
    /// same extension.
    pub fn with_loader(mut self, loader: impl DocumentLoader + 'static) -> Self {
        self.loaders.push(Box::new(loader));
        self
    }

    fn loader_for(&self, path: &Path) -> Option<&dyn DocumentLoader> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.loaders.iter().find(|l| l.extensions().contains(&ext.as_str())).map(|l| l.as_ref())
    }

    /// Load every recognised file in `source_dir`, in file-name order.
    ///
    /// Subdirectories are not descended into. A file that fails to load is
    /// logged and listed in [`IngestReport::skipped`].
    ///
    /// # Errors
    ///
    /// [`RagError::Ingestion`] if `source_dir` is missing or cannot be listed.
    pub fn ingest(&self, source_dir: &Path) -> Result<IngestReport> {
        let entries = fs::read_dir(source_dir).map_err(|e| RagError::Ingestion {
            path: source_dir.to_path_buf(),
            message: format!("cannot read source directory: {e}"),
        })?;

        let mut files: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RagError::Ingestion {
                path: source_dir.to_path_buf(),
                message: format!("cannot list source directory: {e}"),
            })?;
            let path = entry.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        let mut report = IngestReport::default();
        for path in files {
            let Some(loader) = self.loader_for(&path) else {
                debug!(path = %path.display(), "ignoring unrecognised file");
                continue;
            };
            report.files_seen += 1;

            match loader.load(&path) {
                Ok(documents) => {
                    debug!(path = %path.display(), document_count = documents.len(), "loaded file");
                    report.documents.extend(documents);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping file");
                    report.skipped.push((path, e.to_string()));
                }
            }
        }

        info!(
            source = %source_dir.display(),
            files_seen = report.files_seen,
            document_count = report.documents.len(),
            skipped = report.skipped.len(),
            "ingested source directory"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognised_extensions_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.csv"), "a,b").unwrap();
        fs::write(dir.path().join("summary.TXT"), "Revenue grew.").unwrap();

        let report = DocumentIngester::new().ingest(dir.path()).unwrap();
        assert_eq!(report.files_seen, 1);
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.documents[0].id, "summary.TXT");
        assert!(report.documents[0].page().is_none());
    }

    #[test]
    fn missing_directory_is_a_hard_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = DocumentIngester::new().ingest(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, RagError::Ingestion { .. }));
    }

    #[test]
    fn corrupt_pdf_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.pdf"), b"%PDF-1.4 this is not a pdf").unwrap();
        fs::write(dir.path().join("ok.md"), "# Q3\nNet income 12M").unwrap();

        let report = DocumentIngester::new().ingest(dir.path()).unwrap();
        assert_eq!(report.files_seen, 2);
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].0.ends_with("broken.pdf"));
    }
}
