//! Speech transcription through a multimodal generator.

use crate::outcome::{ExtractionInput, ExtractionOutcome, ExtractionStrategy, MethodTag};
use async_trait::async_trait;
use kiln_llm::{ChatMessage, ContentPart, GenerationRequest, Generator};
use std::sync::Arc;
use tracing::debug;

const ASR_PROMPT: &str = "Transcribe the speech in this audio or video into text, \
keeping the speaking order and paragraph structure.";

/// Transcribes audio and video by URL.
#[derive(Clone)]
pub struct LlmTranscriber {
    generator: Arc<dyn Generator>,
}

impl LlmTranscriber {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl ExtractionStrategy for LlmTranscriber {
    fn method(&self) -> MethodTag {
        MethodTag::LlmAsr
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> ExtractionOutcome {
        let Some(url) = input.url else {
            return ExtractionOutcome::failed("transcription requires a file URL", self.method());
        };

        debug!("Transcribing {} ({})", input.filename, input.media_type);

        let request = GenerationRequest::new(vec![ChatMessage::user_parts(vec![
            ContentPart::text(ASR_PROMPT),
            ContentPart::file(url, input.media_type),
        ])]);

        match self.generator.invoke(request).await {
            Ok(response) => ExtractionOutcome::text(response.content, self.method()),
            Err(e) => {
                ExtractionOutcome::failed(format!("transcription failed: {}", e), self.method())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_llm::testing::ScriptedGenerator;

    #[tokio::test]
    async fn test_transcribes_by_url() {
        let generator = ScriptedGenerator::new().with_reply(None, "Speaker one: hello.");
        let asr = LlmTranscriber::new(Arc::new(generator.clone()));

        let outcome = asr
            .extract(&ExtractionInput {
                bytes: None,
                url: Some("https://cdn.example.com/standup.mp3"),
                filename: "standup.mp3",
                media_type: "audio/mpeg",
            })
            .await;

        assert_eq!(outcome.extracted_text(), Some("Speaker one: hello."));
        assert_eq!(outcome.method(), MethodTag::LlmAsr);
        assert_eq!(generator.call_count(None), 1);
    }

    #[tokio::test]
    async fn test_generator_error_is_failed_outcome() {
        let generator = ScriptedGenerator::new().with_failure(None, "model overloaded");
        let asr = LlmTranscriber::new(Arc::new(generator));

        let outcome = asr
            .extract(&ExtractionInput {
                bytes: None,
                url: Some("https://cdn.example.com/clip.mp4"),
                filename: "clip.mp4",
                media_type: "video/mp4",
            })
            .await;

        assert!(matches!(
            outcome,
            ExtractionOutcome::Failed { ref reason, .. } if reason.contains("model overloaded")
        ));
    }
}
