//! Derivation stages: summary, keywords, segments and QA pairs.
//!
//! Every stage sends one schema-constrained request and validates the reply
//! into a typed result. A reply that does not parse is a stage failure.

use crate::error::{DeriveError, DeriveResult};
use kiln_config::DerivationConfig;
use kiln_llm::{ChatMessage, GenerationRequest, Generator, ResponseSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// A document summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub text: String,
}

/// Keywords in the order the model ranked them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Keywords {
    pub list: Vec<String>,
}

/// Ordered text segments. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segments {
    pub list: Vec<String>,
    /// True when the model returned nothing usable and the whole text stands
    /// in as a single segment.
    pub fallback: bool,
}

/// One generated question/answer pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaDraft {
    pub question: String,
    pub answer: String,
}

#[derive(Deserialize)]
struct SummaryReply {
    summary: String,
}

#[derive(Deserialize)]
struct KeywordsReply {
    keywords: Vec<String>,
}

#[derive(Deserialize)]
struct SegmentsReply {
    segments: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QaReply {
    qa_pairs: Vec<QaDraft>,
}

/// Runs the derivation stages against a [`Generator`].
#[derive(Clone)]
pub struct Deriver {
    generator: Arc<dyn Generator>,
    config: DerivationConfig,
}

impl Deriver {
    pub fn new(generator: Arc<dyn Generator>, config: DerivationConfig) -> Self {
        Self { generator, config }
    }

    pub async fn summarize(&self, text: &str) -> DeriveResult<Summary> {
        let input = truncate_chars(text, self.config.input_char_limit);
        let request = GenerationRequest::new(vec![
            ChatMessage::system(
                "You are a document summarization expert. Write concise, accurate \
                 summaries that highlight the core content and key information.",
            ),
            ChatMessage::user(format!(
                "Summarize the following text in at most {} characters. \
                 Return JSON: {{\"summary\": \"...\"}}\n\n{}",
                self.config.summary_max_chars, input
            )),
        ])
        .with_schema(ResponseSchema::new(
            "document_summary",
            json!({
                "type": "object",
                "properties": {
                    "summary": { "type": "string", "description": "Document summary" }
                },
                "required": ["summary"],
                "additionalProperties": false
            }),
        ));

        let reply: SummaryReply = self.request("summary", request).await?;
        let text = reply.summary.trim().to_string();
        if text.is_empty() {
            return Err(malformed("summary", "summary is empty"));
        }

        let chars = text.chars().count();
        if chars > self.config.summary_max_chars {
            debug!(
                "Summary is {} characters, over the {} requested",
                chars, self.config.summary_max_chars
            );
        }

        Ok(Summary { text })
    }

    pub async fn extract_keywords(&self, text: &str) -> DeriveResult<Keywords> {
        let input = truncate_chars(text, self.config.input_char_limit);
        let request = GenerationRequest::new(vec![
            ChatMessage::system(
                "You are a keyword extraction expert. Pick out the most important \
                 keywords and key phrases of a text.",
            ),
            ChatMessage::user(format!(
                "Extract {}-{} keywords from the following text. \
                 Return JSON: {{\"keywords\": [\"keyword1\", \"keyword2\", ...]}}\n\n{}",
                self.config.keyword_min, self.config.keyword_max, input
            )),
        ])
        .with_schema(ResponseSchema::new(
            "keyword_extraction",
            json!({
                "type": "object",
                "properties": {
                    "keywords": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Extracted keywords"
                    }
                },
                "required": ["keywords"],
                "additionalProperties": false
            }),
        ));

        let reply: KeywordsReply = self.request("keywords", request).await?;

        let mut list: Vec<String> = Vec::new();
        for keyword in reply.keywords {
            let keyword = keyword.trim();
            if !keyword.is_empty() && !list.iter().any(|k| k == keyword) {
                list.push(keyword.to_string());
            }
        }
        list.truncate(self.config.keyword_max);

        if list.is_empty() {
            return Err(malformed("keywords", "no keywords returned"));
        }
        if list.len() < self.config.keyword_min {
            debug!("Only {} keywords returned", list.len());
        }

        Ok(Keywords { list })
    }

    /// Split the full text along topic boundaries.
    pub async fn segment(&self, text: &str) -> DeriveResult<Segments> {
        let request = GenerationRequest::new(vec![
            ChatMessage::system(
                "You are a text segmentation expert. Split the input along semantic \
                 and topic boundaries; every segment must be a complete semantic unit.",
            ),
            ChatMessage::user(format!(
                "Segment the following text. \
                 Return JSON: {{\"segments\": [\"segment 1\", \"segment 2\", ...]}}\n\n{}",
                text
            )),
        ])
        .with_schema(ResponseSchema::new(
            "text_segmentation",
            json!({
                "type": "object",
                "properties": {
                    "segments": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Segmented paragraphs in order"
                    }
                },
                "required": ["segments"],
                "additionalProperties": false
            }),
        ));

        let reply: SegmentsReply = self.request("segments", request).await?;
        let list: Vec<String> = reply
            .segments
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();

        if list.is_empty() {
            warn!("Segmentation returned no segments, using the whole text");
            return Ok(Segments::whole(text));
        }

        Ok(Segments {
            list,
            fallback: false,
        })
    }

    pub async fn generate_qa(&self, text: &str) -> DeriveResult<Vec<QaDraft>> {
        let count = self.config.qa_pair_count;
        let input = truncate_chars(text, self.config.input_char_limit);
        let request = GenerationRequest::new(vec![
            ChatMessage::system(
                "You are an expert at writing question/answer pairs. Questions must be \
                 specific and answers accurate and complete, grounded in the text.",
            ),
            ChatMessage::user(format!(
                "Write {} question/answer pairs based on the following text. \
                 Return JSON: {{\"qaPairs\": [{{\"question\": \"...\", \"answer\": \"...\"}}]}}\n\n{}",
                count, input
            )),
        ])
        .with_schema(ResponseSchema::new(
            "qa_generation",
            json!({
                "type": "object",
                "properties": {
                    "qaPairs": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "question": { "type": "string" },
                                "answer": { "type": "string" }
                            },
                            "required": ["question", "answer"],
                            "additionalProperties": false
                        },
                        "description": "Generated question/answer pairs"
                    }
                },
                "required": ["qaPairs"],
                "additionalProperties": false
            }),
        ));

        let reply: QaReply = self.request("qa", request).await?;
        let mut pairs: Vec<QaDraft> = reply
            .qa_pairs
            .into_iter()
            .map(|p| QaDraft {
                question: p.question.trim().to_string(),
                answer: p.answer.trim().to_string(),
            })
            .filter(|p| !p.question.is_empty() && !p.answer.is_empty())
            .collect();
        pairs.truncate(count);

        Ok(pairs)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        stage: &'static str,
        request: GenerationRequest,
    ) -> DeriveResult<T> {
        let response = self.generator.invoke(request).await?;
        parse_reply(stage, &response.content)
    }
}

impl Segments {
    /// The whole text as the only segment.
    pub fn whole(text: &str) -> Self {
        Self {
            list: vec![text.to_string()],
            fallback: true,
        }
    }
}

/// Parse structured content, tolerating a surrounding Markdown code fence.
fn parse_reply<T: DeserializeOwned>(stage: &'static str, content: &str) -> DeriveResult<T> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(malformed(stage, "empty response"));
    }

    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    serde_json::from_str(body).map_err(|e| malformed(stage, &e.to_string()))
}

fn malformed(stage: &'static str, message: &str) -> DeriveError {
    DeriveError::Malformed {
        stage,
        message: message.to_string(),
    }
}

/// The first `limit` characters of `text`.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
