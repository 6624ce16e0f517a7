//! OCR through a multimodal generator.

use crate::outcome::{ExtractionInput, ExtractionOutcome, ExtractionStrategy, MethodTag};
use async_trait::async_trait;
use kiln_llm::{ChatMessage, ContentPart, GenerationRequest, Generator};
use std::sync::Arc;
use tracing::debug;

const OCR_PROMPT: &str = "Recognize and extract all text content in this file, \
preserving the original formatting and structure.";

/// Reads text out of an image or scanned document by handing its URL to a
/// multimodal model.
#[derive(Clone)]
pub struct LlmOcr {
    generator: Arc<dyn Generator>,
}

impl LlmOcr {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Images travel as `image_url`, everything else as `file_url`.
    fn build_request(url: &str, media_type: &str) -> GenerationRequest {
        let attachment = if media_type.starts_with("image/") {
            ContentPart::image(url)
        } else {
            ContentPart::file(url, media_type)
        };

        GenerationRequest::new(vec![ChatMessage::user_parts(vec![
            ContentPart::text(OCR_PROMPT),
            attachment,
        ])])
    }
}

#[async_trait]
impl ExtractionStrategy for LlmOcr {
    fn method(&self) -> MethodTag {
        MethodTag::LlmOcr
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> ExtractionOutcome {
        let Some(url) = input.url else {
            return ExtractionOutcome::failed("OCR requires a file URL", self.method());
        };

        debug!("Running OCR on {} ({})", input.filename, input.media_type);

        match self
            .generator
            .invoke(Self::build_request(url, input.media_type))
            .await
        {
            Ok(response) => ExtractionOutcome::text(response.content, self.method()),
            Err(e) => ExtractionOutcome::failed(format!("OCR failed: {}", e), self.method()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_llm::testing::ScriptedGenerator;
    use kiln_llm::MessageContent;

    fn input<'a>(url: Option<&'a str>, media_type: &'a str) -> ExtractionInput<'a> {
        ExtractionInput {
            bytes: None,
            url,
            filename: "scan",
            media_type,
        }
    }

    fn attachment(request: &GenerationRequest) -> serde_json::Value {
        match &request.messages[0].content {
            MessageContent::Parts(parts) => serde_json::to_value(&parts[1]).unwrap(),
            MessageContent::Text(_) => panic!("expected multipart content"),
        }
    }

    #[tokio::test]
    async fn test_image_uses_image_url_part() {
        let generator = ScriptedGenerator::new().with_reply(None, "Line one\nLine two");
        let ocr = LlmOcr::new(Arc::new(generator.clone()));

        let outcome = ocr
            .extract(&input(Some("https://cdn.example.com/board.png"), "image/png"))
            .await;

        assert_eq!(outcome.extracted_text(), Some("Line one\nLine two"));
        let part = attachment(&generator.calls()[0]);
        assert_eq!(part["type"], "image_url");
        assert_eq!(part["image_url"]["url"], "https://cdn.example.com/board.png");
    }

    #[tokio::test]
    async fn test_pdf_uses_file_url_part() {
        let generator = ScriptedGenerator::new().with_reply(None, "scanned text");
        let ocr = LlmOcr::new(Arc::new(generator.clone()));

        ocr.extract(&input(Some("https://cdn.example.com/scan.pdf"), "application/pdf"))
            .await;

        let part = attachment(&generator.calls()[0]);
        assert_eq!(part["type"], "file_url");
        assert_eq!(part["file_url"]["mime_type"], "application/pdf");
    }

    #[tokio::test]
    async fn test_empty_reply_is_failure() {
        let generator = ScriptedGenerator::new().with_reply(None, "");
        let ocr = LlmOcr::new(Arc::new(generator));

        let outcome = ocr
            .extract(&input(Some("https://cdn.example.com/blank.png"), "image/png"))
            .await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.method(), MethodTag::LlmOcr);
    }

    #[tokio::test]
    async fn test_missing_url_skips_generator() {
        let generator = ScriptedGenerator::new().with_reply(None, "unused");
        let ocr = LlmOcr::new(Arc::new(generator.clone()));

        let outcome = ocr.extract(&input(None, "image/png")).await;
        assert!(!outcome.is_success());
        assert!(generator.calls().is_empty());
    }
}
