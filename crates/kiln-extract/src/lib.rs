//! Kiln Extract - Extraction strategies that turn file bytes or URLs into text.
//!
//! This crate provides:
//! - Structured-document parsing (PDF, Markdown, plain text)
//! - Advanced-layout PDF conversion (via the `mineru` CLI)
//! - OCR and speech transcription over a multimodal [`kiln_llm::Generator`]
//!
//! Every strategy reports expected failures as [`ExtractionOutcome::Failed`]
//! values rather than errors.

mod error;
mod inline;
mod layout;
mod ocr;
mod outcome;
pub mod parsers;
mod transcribe;

pub use error::{ExtractError, ExtractResult};
pub use inline::data_url;
pub use layout::{
    should_use_layout, LayoutConverter, LayoutOutput, LayoutStrategy, MineruConverter,
};
pub use ocr::LlmOcr;
pub use outcome::{ExtractionInput, ExtractionOutcome, ExtractionStrategy, MethodTag};
pub use parsers::{ParserRegistry, StructuredExtractor};
pub use transcribe::LlmTranscriber;

/// Check which external tools are on the PATH.
pub fn check_dependencies(layout_command: &str) -> Vec<(String, bool)> {
    vec![(
        layout_command.to_string(),
        which::which(layout_command).is_ok(),
    )]
}
