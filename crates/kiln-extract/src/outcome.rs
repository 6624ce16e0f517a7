//! Extraction inputs, outcomes and the strategy trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which converter produced (or failed to produce) the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodTag {
    #[serde(rename = "mineru")]
    Mineru,
    #[serde(rename = "pdf-parse")]
    PdfParse,
    #[serde(rename = "markdown")]
    Markdown,
    #[serde(rename = "plain-text")]
    PlainText,
    #[serde(rename = "structured")]
    Structured,
    #[serde(rename = "llm-ocr")]
    LlmOcr,
    #[serde(rename = "llm-asr")]
    LlmAsr,
}

impl MethodTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodTag::Mineru => "mineru",
            MethodTag::PdfParse => "pdf-parse",
            MethodTag::Markdown => "markdown",
            MethodTag::PlainText => "plain-text",
            MethodTag::Structured => "structured",
            MethodTag::LlmOcr => "llm-ocr",
            MethodTag::LlmAsr => "llm-asr",
        }
    }
}

impl std::fmt::Display for MethodTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything a strategy may look at.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionInput<'a> {
    pub bytes: Option<&'a [u8]>,
    pub url: Option<&'a str>,
    pub filename: &'a str,
    pub media_type: &'a str,
}

/// Result of one strategy attempt. Expected failures are values, not errors.
///
/// `details` holds what the converter learned about the source on the way,
/// such as a page count or a document title.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    Text {
        text: String,
        method: MethodTag,
        details: Map<String, Value>,
    },
    Failed {
        reason: String,
        method: MethodTag,
    },
}

impl ExtractionOutcome {
    /// Successful outcome, downgraded to a failure when `text` is blank.
    pub fn text(text: impl Into<String>, method: MethodTag) -> Self {
        let text = text.into();
        if text.trim().is_empty() {
            return Self::failed(format!("{} produced no text", method), method);
        }
        ExtractionOutcome::Text {
            text,
            method,
            details: Map::new(),
        }
    }

    /// Merge `extra` into the details of a successful outcome.
    pub fn with_details(mut self, extra: Map<String, Value>) -> Self {
        if let ExtractionOutcome::Text { details, .. } = &mut self {
            details.extend(extra);
        }
        self
    }

    pub fn failed(reason: impl Into<String>, method: MethodTag) -> Self {
        ExtractionOutcome::Failed {
            reason: reason.into(),
            method,
        }
    }

    pub fn method(&self) -> MethodTag {
        match self {
            ExtractionOutcome::Text { method, .. } | ExtractionOutcome::Failed { method, .. } => {
                *method
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionOutcome::Text { .. })
    }

    pub fn extracted_text(&self) -> Option<&str> {
        match self {
            ExtractionOutcome::Text { text, .. } => Some(text),
            ExtractionOutcome::Failed { .. } => None,
        }
    }

    pub fn details(&self) -> Option<&Map<String, Value>> {
        match self {
            ExtractionOutcome::Text { details, .. } => Some(details),
            ExtractionOutcome::Failed { .. } => None,
        }
    }
}

/// A single converter from file bytes or URL to plain text.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Tag used when the strategy cannot say more precisely.
    fn method(&self) -> MethodTag;

    /// Attempt extraction. Never panics or errors for expected failures.
    async fn extract(&self, input: &ExtractionInput<'_>) -> ExtractionOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_text_is_failure() {
        let outcome = ExtractionOutcome::text("  \n ", MethodTag::LlmOcr);
        assert!(!outcome.is_success());
        assert_eq!(outcome.method(), MethodTag::LlmOcr);
        assert!(matches!(outcome, ExtractionOutcome::Failed { ref reason, .. } if reason.contains("llm-ocr")));
    }

    #[test]
    fn test_details_only_stick_to_success() {
        let mut extra = Map::new();
        extra.insert("pages".to_string(), Value::from(3));

        let ok = ExtractionOutcome::text("body", MethodTag::PdfParse).with_details(extra.clone());
        assert_eq!(ok.details().unwrap()["pages"], 3);

        let failed = ExtractionOutcome::failed("empty", MethodTag::PdfParse).with_details(extra);
        assert!(failed.details().is_none());
    }

    #[test]
    fn test_method_tag_serializes_as_wire_name() {
        assert_eq!(
            serde_json::to_value(MethodTag::PdfParse).unwrap(),
            serde_json::json!("pdf-parse")
        );
    }
}
