//! PDF document parser.

use super::{DocumentParser, ParsedDocument};
use crate::error::{ExtractError, ExtractResult};
use crate::outcome::MethodTag;
use tracing::debug;

/// Parser for PDF files with an embedded text layer.
pub struct PdfParser;

impl PdfParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentParser for PdfParser {
    fn parse(&self, bytes: &[u8], filename: &str) -> ExtractResult<ParsedDocument> {
        debug!("Parsing PDF: {} ({} bytes)", filename, bytes.len());

        let raw = pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Parse {
            format: "pdf".to_string(),
            message: e.to_string(),
        })?;

        let pages = raw.matches('\x0C').count().max(1);
        let content = clean_pdf_text(&raw);

        let metadata = serde_json::json!({
            "format": "pdf",
            "pages": pages,
        });

        Ok(ParsedDocument::new(content).with_metadata(metadata))
    }

    fn method(&self) -> MethodTag {
        MethodTag::PdfParse
    }

    fn extensions(&self) -> &[&str] {
        &["pdf"]
    }

    fn supports_media_type(&self, media_type: &str) -> bool {
        media_type.to_ascii_lowercase().contains("pdf")
    }
}

/// Trim lines, collapse runs of blank lines and mark page breaks.
fn clean_pdf_text(text: &str) -> String {
    text.lines()
        .map(|line| line.trim())
        .fold(Vec::new(), |mut acc: Vec<String>, line| {
            let last_was_empty = acc.last().map(|s| s.is_empty()).unwrap_or(false);
            if !(line.is_empty() && last_was_empty) {
                acc.push(line.to_string());
            }
            acc
        })
        .join("\n")
        .replace('\x0C', "\n\n")
        .trim()
        .to_string()
}
