//! Structured-document parsers and the strategy that runs them.

mod markdown;
mod pdf;
mod text;

pub use markdown::MarkdownParser;
pub use pdf::PdfParser;
pub use text::TextParser;

use crate::error::ExtractResult;
use crate::outcome::{ExtractionInput, ExtractionOutcome, ExtractionStrategy, MethodTag};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Parsed document content.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    /// The main text content.
    pub content: String,
    /// Document title (if extracted).
    pub title: Option<String>,
    /// Extracted metadata.
    pub metadata: serde_json::Value,
}

impl ParsedDocument {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            title: None,
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Trait for document parsers working on in-memory bytes.
pub trait DocumentParser: Send + Sync {
    /// Parse the bytes of a file named `filename`.
    fn parse(&self, bytes: &[u8], filename: &str) -> ExtractResult<ParsedDocument>;

    /// Tag recorded when this parser produced the text.
    fn method(&self) -> MethodTag;

    /// Get the supported file extensions.
    fn extensions(&self) -> &[&str];

    /// Whether the parser understands this media type.
    fn supports_media_type(&self, _media_type: &str) -> bool {
        false
    }

    /// Check if this parser supports the given extension.
    fn supports(&self, extension: &str) -> bool {
        self.extensions()
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    }
}

/// Ordered set of parsers; the first that supports a file wins.
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn DocumentParser>>,
}

impl ParserRegistry {
    pub fn empty() -> Self {
        Self { parsers: vec![] }
    }

    pub fn with_parser(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.parsers.push(parser);
        self
    }

    /// Find a parser by extension first, then by media type.
    pub fn find(&self, filename: &str, media_type: &str) -> Option<Arc<dyn DocumentParser>> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        self.parsers
            .iter()
            .find(|p| !extension.is_empty() && p.supports(extension))
            .or_else(|| self.parsers.iter().find(|p| p.supports_media_type(media_type)))
            .cloned()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::empty()
            .with_parser(Arc::new(PdfParser::new()))
            .with_parser(Arc::new(MarkdownParser::new()))
            .with_parser(Arc::new(TextParser::new()))
    }
}

/// Direct text extraction from a document container.
///
/// Succeeds only when the text is longer than `min_chars` characters;
/// shorter output usually means a scanned, image-only document.
#[derive(Clone)]
pub struct StructuredExtractor {
    registry: ParserRegistry,
    min_chars: usize,
}

impl StructuredExtractor {
    pub fn new(registry: ParserRegistry, min_chars: usize) -> Self {
        Self {
            registry,
            min_chars,
        }
    }
}

#[async_trait]
impl ExtractionStrategy for StructuredExtractor {
    fn method(&self) -> MethodTag {
        MethodTag::Structured
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> ExtractionOutcome {
        let Some(bytes) = input.bytes else {
            return ExtractionOutcome::failed("no file bytes available", self.method());
        };

        let Some(parser) = self.registry.find(input.filename, input.media_type) else {
            return ExtractionOutcome::failed(
                format!(
                    "unsupported document format: {} ({})",
                    input.filename, input.media_type
                ),
                self.method(),
            );
        };

        let method = parser.method();
        let owned = bytes.to_vec();
        let filename = input.filename.to_string();

        // Parsing is CPU-bound and some decoders panic on malformed input
        let parsed = tokio::task::spawn_blocking(move || {
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                parser.parse(&owned, &filename)
            }))
        })
        .await;

        let doc = match parsed {
            Ok(Ok(Ok(doc))) => doc,
            Ok(Ok(Err(e))) => return ExtractionOutcome::failed(e.to_string(), method),
            Ok(Err(_)) | Err(_) => {
                return ExtractionOutcome::failed(format!("{} parser crashed", method), method)
            }
        };

        let chars = doc.content.trim().chars().count();
        debug!("{} extracted {} characters from {}", method, chars, input.filename);

        if chars <= self.min_chars {
            return ExtractionOutcome::failed(
                format!(
                    "extracted only {} characters; likely a scanned or image-only document",
                    chars
                ),
                method,
            );
        }

        let mut details = match doc.metadata {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        if let Some(title) = doc.title {
            details.insert("title".to_string(), title.into());
        }

        ExtractionOutcome::text(doc.content, method).with_details(details)
    }
}
