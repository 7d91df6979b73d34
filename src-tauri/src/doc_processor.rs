use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use tracing::{error, info, warn};

/// Extensions accepted for upload, lowercase.
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "pdf"];

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub tesseract_path: String,
    pub pdftoppm_path: String,
    /// Tried in order; the first result above `min_chars` wins.
    pub languages: Vec<String>,
    pub min_chars: usize,
    pub dpi: u32,
    pub prefer_text_layer: bool,
    pub text_layer_min_chars: usize,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_path: "tesseract".into(),
            pdftoppm_path: "pdftoppm".into(),
            languages: vec!["spa".into(), "eng".into()],
            min_chars: 10,
            dpi: 300,
            prefer_text_layer: true,
            text_layer_min_chars: 50,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("{tool} failed (exit code {code}): {stderr}")]
    Tool {
        tool: String,
        code: i32,
        stderr: String,
    },
    #[error("PDF produced no pages")]
    NoPages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentKind {
    Image,
    Pdf,
}

fn document_kind(path: &Path) -> Option<DocumentKind> {
    match extension_of(path)?.as_str() {
        "png" | "jpg" | "jpeg" => Some(DocumentKind::Image),
        "pdf" => Some(DocumentKind::Pdf),
        _ => None,
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Whether an uploaded filename passes the extension allow-list.
pub fn is_allowed_file(filename: &str) -> bool {
    extension_of(Path::new(filename))
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Number of characters left after trimming surrounding whitespace.
pub fn meaningful_len(text: &str) -> usize {
    text.trim().chars().count()
}

pub fn has_sufficient_text(text: &str, min_chars: usize) -> bool {
    meaningful_len(text) >= min_chars
}

/// Best-effort OCR over images and PDFs. Never fails: problems are logged
/// and yield an empty string.
#[derive(Debug, Clone)]
pub struct DocumentExtractor {
    config: OcrConfig,
}

impl DocumentExtractor {
    pub fn new(config: OcrConfig) -> Self {
        Self { config }
    }

    pub fn extract(&self, path: &Path) -> String {
        if !path.exists() {
            error!(path = %path.display(), "file not found");
            return String::new();
        }

        let result = match document_kind(path) {
            Some(DocumentKind::Image) => self.extract_image(path),
            Some(DocumentKind::Pdf) => self.extract_pdf(path),
            None => {
                error!(path = %path.display(), "unsupported file format");
                return String::new();
            }
        };

        match result {
            Ok(text) => {
                if meaningful_len(&text) < self.config.min_chars {
                    warn!(path = %path.display(), "little or no text extracted");
                } else {
                    info!(path = %path.display(), chars = text.len(), "text extracted");
                }
                text
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "document processing failed");
                String::new()
            }
        }
    }

    fn extract_image(&self, path: &Path) -> Result<String, ExtractError> {
        info!(path = %path.display(), "processing image");
        let scratch = TempDir::new()?;
        let gray = scratch.path().join("gray.png");
        image::open(path)?.grayscale().save(&gray)?;
        Ok(self.ocr_with_fallback(&gray, "image"))
    }

    fn extract_pdf(&self, path: &Path) -> Result<String, ExtractError> {
        info!(path = %path.display(), "processing PDF");

        if self.config.prefer_text_layer {
            match read_text_layer(path) {
                Ok(text) if has_sufficient_text(&text, self.config.text_layer_min_chars) => {
                    info!("using embedded PDF text layer");
                    return Ok(text);
                }
                Ok(_) => info!("PDF text layer too short, falling back to OCR"),
                Err(e) => warn!(error = %e, "PDF text layer unreadable, falling back to OCR"),
            }
        }

        let scratch = TempDir::new()?;
        let pages = self.render_pages(path, scratch.path())?;
        info!(pages = pages.len(), "rendered PDF pages");

        let mut text = String::new();
        for (i, page) in pages.iter().enumerate() {
            let page_num = i + 1;
            let page_text = self.ocr_with_fallback(page, &format!("page {}", page_num));
            text.push_str(&format!("--- PAGINA {} ---\n{}\n\n", page_num, page_text));
        }
        Ok(text)
    }

    /// Try each configured language, then a final run with tesseract's default.
    fn ocr_with_fallback(&self, image: &Path, label: &str) -> String {
        let mut text = String::new();
        for lang in &self.config.languages {
            info!(target_doc = label, lang = %lang, "attempting OCR");
            match self.run_tesseract(image, Some(lang)) {
                Ok(out) => {
                    text = out;
                    if meaningful_len(&text) > self.config.min_chars {
                        info!(target_doc = label, lang = %lang, "OCR succeeded");
                        return text;
                    }
                }
                Err(e) => warn!(target_doc = label, lang = %lang, error = %e, "OCR failed"),
            }
        }

        warn!(target_doc = label, "retrying OCR without a language");
        match self.run_tesseract(image, None) {
            Ok(out) => out,
            Err(e) => {
                warn!(target_doc = label, error = %e, "OCR without language failed");
                text
            }
        }
    }

    fn run_tesseract(&self, image: &Path, lang: Option<&str>) -> Result<String, ExtractError> {
        let mut cmd = Command::new(&self.config.tesseract_path);
        cmd.arg(image.as_os_str()).arg("stdout");
        if let Some(lang) = lang {
            cmd.arg("-l").arg(lang);
        }
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(ExtractError::Tool {
                tool: "tesseract".into(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Rasterize every page as a grayscale PNG, in page order.
    fn render_pages(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
        let prefix = out_dir.join("page");
        let output = Command::new(&self.config.pdftoppm_path)
            .arg("-png")
            .arg("-gray")
            .arg("-r")
            .arg(self.config.dpi.to_string())
            .arg(pdf.as_os_str())
            .arg(prefix.as_os_str())
            .output()?;

        if !output.status.success() {
            return Err(ExtractError::Tool {
                tool: "pdftoppm".into(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let mut pages: Vec<PathBuf> = fs::read_dir(out_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().map(|e| e == "png").unwrap_or(false))
            .collect();
        // pdftoppm zero-pads page numbers, so lexical order is page order.
        pages.sort();

        if pages.is_empty() {
            return Err(ExtractError::NoPages);
        }
        Ok(pages)
    }
}

fn read_text_layer(path: &Path) -> Result<String, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    pdf_extract::extract_text_from_mem(&bytes).map_err(|e| format!("PDF parse error: {}", e))
}
