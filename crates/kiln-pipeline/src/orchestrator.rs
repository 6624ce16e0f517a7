//! Drives one source file through extraction, derivation and record creation.

use crate::blob::BlobStore;
use crate::derive::{Deriver, Keywords, Segments, Summary};
use crate::error::{PipelineError, PipelineResult};
use crate::selector::ExtractionSelector;
use crate::tracker::TaskTracker;
use kiln_core::{FileKind, FileStatus, KnowledgeItem, QaPair, SourceFile, TaskKind};
use kiln_db::{Database, DbError};
use kiln_extract::{data_url, ExtractionInput, ExtractionOutcome, MethodTag};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to one file.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub source_id: String,
    pub status: FileStatus,
    pub method: Option<MethodTag>,
    pub extracted_chars: usize,
    pub knowledge_items: usize,
    pub qa_pairs: usize,
    /// Derivation stages whose task failed while the file still completed.
    pub failed_stages: Vec<TaskKind>,
    pub error: Option<String>,
}

impl ProcessReport {
    fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            status: FileStatus::Processing,
            method: None,
            extracted_chars: 0,
            knowledge_items: 0,
            qa_pairs: 0,
            failed_stages: Vec::new(),
            error: None,
        }
    }
}

/// Largest blob sent inline when no `inline_max_bytes` is configured.
const DEFAULT_INLINE_MAX_BYTES: u64 = 20 * 1024 * 1024;

/// The per-file state machine: `pending -> processing -> completed | failed`.
#[derive(Clone)]
pub struct Orchestrator {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    selector: ExtractionSelector,
    deriver: Deriver,
    tracker: TaskTracker,
    inline_max_bytes: u64,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        blobs: Arc<dyn BlobStore>,
        selector: ExtractionSelector,
        deriver: Deriver,
    ) -> Self {
        Self {
            tracker: TaskTracker::new(db.clone()),
            db,
            blobs,
            selector,
            deriver,
            inline_max_bytes: DEFAULT_INLINE_MAX_BYTES,
        }
    }

    /// Cap on blobs sent to OCR or transcription as `data:` URLs when the
    /// file has no `http(s)` URL. Zero disables inlining.
    pub fn with_inline_limit(mut self, max_bytes: u64) -> Self {
        self.inline_max_bytes = max_bytes;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Claim and process one source file.
    ///
    /// Refuses files that are not `pending`. Once claimed the file always
    /// ends `completed` or `failed`; processing failures are reported in the
    /// returned [`ProcessReport`], not as errors.
    pub async fn process(&self, source_id: &str) -> PipelineResult<ProcessReport> {
        let file = self.db.get_source_file(source_id)?;
        if !self.db.claim_source_file(source_id)? {
            let current = self.db.get_source_file(source_id)?;
            return Err(PipelineError::NotClaimable {
                id: source_id.to_string(),
                status: current.status.to_string(),
            });
        }

        info!("Processing {} ({}, {})", file.name, file.kind, file.id);
        let mut report = ProcessReport::new(&file.id);

        match self.run(&file, &mut report).await {
            Ok(()) => {
                self.db.finish_source_file(&file.id, FileStatus::Completed)?;
                report.status = FileStatus::Completed;
                info!(
                    "Completed {}: {} knowledge items, {} QA pairs",
                    file.name, report.knowledge_items, report.qa_pairs
                );
            }
            Err(e) => {
                let message = e.to_string();
                error!("Processing {} failed: {}", file.name, message);
                self.abandon(&file.id, &message)?;
                report.status = FileStatus::Failed;
                report.error = Some(message);
            }
        }

        Ok(report)
    }

    /// Fail a file whose job went wrong, closing any task it left open.
    ///
    /// A file the failed job never claimed is walked through `processing` so
    /// it does not sit in `pending` without a job.
    pub fn abandon(&self, source_id: &str, reason: &str) -> PipelineResult<()> {
        match self.tracker.fail_open(source_id, reason) {
            Ok(0) => {}
            Ok(n) => debug!("Closed {} open tasks for {}", n, source_id),
            Err(e) => warn!("Could not close open tasks for {}: {}", source_id, e),
        }

        match self.db.finish_source_file(source_id, FileStatus::Failed) {
            Ok(()) => Ok(()),
            Err(DbError::InvalidTransition { from, .. }) if from == FileStatus::Pending.as_str() => {
                if self.db.claim_source_file(source_id)? {
                    self.db.finish_source_file(source_id, FileStatus::Failed)?;
                }
                Ok(())
            }
            // Already terminal
            Err(DbError::InvalidTransition { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn run(&self, file: &SourceFile, report: &mut ProcessReport) -> PipelineResult<()> {
        let text = self.extract(file, report).await?;
        let creator = file.uploaded_by.as_str();

        // Summary and keywords share the summarization task
        let mut task = self.tracker.start(&file.id, TaskKind::Summarization, creator)?;
        let summary = self.deriver.summarize(&text).await;
        self.tracker.advance(&mut task, 50)?;
        let keywords = self.deriver.extract_keywords(&text).await;

        let (summary, keywords) = match (summary, keywords) {
            (Ok(summary), Ok(keywords)) => {
                self.tracker.complete(
                    &mut task,
                    Some(json!({ "summary": summary.text, "keywords": keywords.list })),
                )?;
                (Some(summary), Some(keywords))
            }
            (summary, keywords) => {
                let errors: Vec<String> = [
                    summary.as_ref().err().map(|e| e.to_string()),
                    keywords.as_ref().err().map(|e| e.to_string()),
                ]
                .into_iter()
                .flatten()
                .collect();
                self.tracker.fail(&mut task, &errors.join("; "))?;
                report.failed_stages.push(TaskKind::Summarization);
                (summary.ok(), keywords.ok())
            }
        };

        let mut task = self.tracker.start(&file.id, TaskKind::Segmentation, creator)?;
        let segments = match self.deriver.segment(&text).await {
            Ok(segments) => {
                self.tracker.complete(
                    &mut task,
                    Some(json!({ "segments": segments.list.len(), "fallback": segments.fallback })),
                )?;
                segments
            }
            Err(e) => {
                self.tracker.fail(&mut task, &e.to_string())?;
                report.failed_stages.push(TaskKind::Segmentation);
                Segments::whole(&text)
            }
        };

        let items = build_knowledge_items(file, &segments, summary.as_ref(), keywords.as_ref())?;
        self.db.create_knowledge_items(&items)?;
        report.knowledge_items = items.len();
        info!("Created {} knowledge items for {}", items.len(), file.name);

        let mut task = self.tracker.start(&file.id, TaskKind::QaGeneration, creator)?;
        match self.deriver.generate_qa(&text).await {
            Ok(drafts) => {
                let pairs: Vec<QaPair> = drafts
                    .into_iter()
                    .map(|d| QaPair::new(&file.id, d.question, d.answer, creator))
                    .collect();
                self.db.create_qa_pairs(&pairs)?;
                report.qa_pairs = pairs.len();
                self.tracker
                    .complete(&mut task, Some(json!({ "pairs": pairs.len() })))?;
            }
            Err(e) => {
                self.tracker.fail(&mut task, &e.to_string())?;
                report.failed_stages.push(TaskKind::QaGeneration);
            }
        }

        Ok(())
    }

    /// Run the extraction plan, one task per stage, until a stage yields text.
    async fn extract(&self, file: &SourceFile, report: &mut ProcessReport) -> PipelineResult<String> {
        let remote = remote_url(&file.file_url);

        // Documents are parsed locally; other kinds only need their bytes
        // when they have to travel inline
        let mut fetch_error = None;
        let bytes = if file.kind == FileKind::Document || remote.is_none() {
            match self.blobs.fetch(&file.file_url).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!("Could not read {} from {}: {}", file.name, file.file_url, e);
                    fetch_error = Some(format!("file could not be read: {}", e));
                    None
                }
            }
        } else {
            None
        };

        let media_type = file.effective_media_type();
        let inline = match (remote, bytes.as_deref()) {
            (None, Some(bytes)) => self.inline_url(&media_type, bytes),
            _ => None,
        };
        let url = remote.or(inline.as_deref());

        let plan = self.selector.plan(file, url.is_some()).await;
        debug!("Extraction plan for {}: {:?}", file.name, plan.methods());

        let input = ExtractionInput {
            bytes: bytes.as_deref(),
            url,
            filename: &file.name,
            media_type: &media_type,
        };

        let mut last_reason = None;
        for stage in &plan.stages {
            let mut task = self.tracker.start(&file.id, stage.task, &file.uploaded_by)?;

            // Local strategies need the bytes; URL strategies need the bytes
            // too when there is no URL
            if let Some(reason) = &fetch_error {
                if stage.task == TaskKind::Extraction || url.is_none() {
                    self.tracker.fail(&mut task, reason)?;
                    last_reason = Some(reason.clone());
                    continue;
                }
            }

            match stage.run(&input).await {
                ExtractionOutcome::Text {
                    text,
                    method,
                    mut details,
                } => {
                    let chars = text.chars().count();
                    details.insert("method".to_string(), json!(method));
                    details.insert("chars".to_string(), json!(chars));
                    self.tracker.complete(&mut task, Some(Value::Object(details)))?;

                    info!("Extracted {} characters from {} with {}", chars, file.name, method);
                    report.method = Some(method);
                    report.extracted_chars = chars;
                    return Ok(text);
                }
                ExtractionOutcome::Failed { reason, .. } => {
                    self.tracker.fail(&mut task, &reason)?;
                    last_reason = Some(reason);
                }
            }
        }

        let reason = plan
            .exhausted_reason()
            .map(str::to_string)
            .or(last_reason)
            .unwrap_or_else(|| "no extraction strategy produced text".to_string());
        Err(PipelineError::Extraction(reason))
    }

    /// A `data:` URL for a blob the generation service cannot fetch, if it is
    /// small enough to send inline.
    fn inline_url(&self, media_type: &str, bytes: &[u8]) -> Option<String> {
        if bytes.is_empty() || bytes.len() as u64 > self.inline_max_bytes {
            return None;
        }
        debug!("Sending {} bytes of {} inline", bytes.len(), media_type);
        Some(data_url(media_type, bytes))
    }
}

/// The URL a generation service could fetch, if the file has one.
fn remote_url(file_url: &str) -> Option<&str> {
    (file_url.starts_with("https://") || file_url.starts_with("http://")).then_some(file_url)
}

/// One draft item per segment; the first carries the summary and keywords.
fn build_knowledge_items(
    file: &SourceFile,
    segments: &Segments,
    summary: Option<&Summary>,
    keywords: Option<&Keywords>,
) -> PipelineResult<Vec<KnowledgeItem>> {
    segments
        .list
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            let title = format!("{} - segment {}", file.name, i + 1);
            let mut item = KnowledgeItem::new(&file.id, title, segment.as_str(), &file.uploaded_by)?;
            if i == 0 {
                if let Some(summary) = summary {
                    item = item.with_summary(summary.text.as_str());
                }
                if let Some(keywords) = keywords {
                    item = item.with_tags(keywords.list.clone());
                }
            }
            Ok(item)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::selector::NO_URL_FOR_OCR;
    use kiln_config::{DerivationConfig, ExtractionConfig};
    use kiln_core::{KnowledgeFilter, ReviewStatus, TaskStatus};
    use kiln_extract::parsers::{DocumentParser, ParsedDocument};
    use kiln_extract::{
        ExtractError, ExtractResult, LayoutConverter, LayoutOutput, ParserRegistry,
        StructuredExtractor,
    };
    use kiln_llm::testing::ScriptedGenerator;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Treats PDF bytes as their UTF-8 text.
    struct PlainPdf;

    impl DocumentParser for PlainPdf {
        fn parse(&self, bytes: &[u8], _filename: &str) -> ExtractResult<ParsedDocument> {
            Ok(ParsedDocument::new(String::from_utf8_lossy(bytes))
                .with_metadata(serde_json::json!({ "pages": 3 })))
        }

        fn method(&self) -> MethodTag {
            MethodTag::PdfParse
        }

        fn extensions(&self) -> &[&str] {
            &["pdf"]
        }
    }

    /// Layout converter with a fixed availability and reply, counting calls.
    struct StubLayout {
        available: bool,
        reply: Option<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl LayoutConverter for StubLayout {
        async fn is_available(&self) -> bool {
            self.available
        }

        async fn convert(&self, _pdf: &[u8], filename: &str) -> ExtractResult<LayoutOutput> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(filename.to_string());
            }
            match &self.reply {
                Some(markdown) => Ok(LayoutOutput {
                    markdown: markdown.clone(),
                    json: None,
                    elapsed: Duration::from_millis(5),
                }),
                None => Err(ExtractError::ProcessFailed {
                    code: 2,
                    stderr: "model weights missing".to_string(),
                }),
            }
        }
    }

    struct Harness {
        db: Database,
        blobs: MemoryBlobStore,
        generator: ScriptedGenerator,
        layout: Arc<StubLayout>,
        orchestrator: Orchestrator,
    }

    fn harness(generator: ScriptedGenerator, layout: StubLayout) -> Harness {
        let db = Database::open_in_memory().unwrap();
        let blobs = MemoryBlobStore::new();
        let layout = Arc::new(layout);
        let llm: Arc<dyn kiln_llm::Generator> = Arc::new(generator.clone());

        let selector = ExtractionSelector::new(
            &ExtractionConfig::default(),
            llm.clone(),
            Some(layout.clone() as Arc<dyn LayoutConverter>),
        )
        .with_structured(Arc::new(StructuredExtractor::new(
            ParserRegistry::empty().with_parser(Arc::new(PlainPdf)),
            100,
        )));
        let deriver = Deriver::new(llm, DerivationConfig::default());

        let orchestrator =
            Orchestrator::new(db.clone(), Arc::new(blobs.clone()), selector, deriver);
        Harness {
            db,
            blobs,
            generator,
            layout,
            orchestrator,
        }
    }

    fn no_layout() -> StubLayout {
        StubLayout {
            available: false,
            reply: None,
            calls: Mutex::new(vec![]),
        }
    }

    fn full_script() -> ScriptedGenerator {
        ScriptedGenerator::new()
            .with_reply(
                Some("document_summary"),
                r#"{"summary": "Operating and maintenance manual for the V1 pump."}"#,
            )
            .with_reply(
                Some("keyword_extraction"),
                r#"{"keywords": ["pump", "maintenance", "seal", "torque", "safety"]}"#,
            )
            .with_reply(
                Some("text_segmentation"),
                r#"{"segments": ["Safety first.", "Installation steps.", "Maintenance schedule."]}"#,
            )
            .with_reply(
                Some("qa_generation"),
                r#"{"qaPairs": [
                    {"question": "Q1?", "answer": "A1"},
                    {"question": "Q2?", "answer": "A2"},
                    {"question": "Q3?", "answer": "A3"},
                    {"question": "Q4?", "answer": "A4"},
                    {"question": "Q5?", "answer": "A5"}
                ]}"#,
            )
    }

    fn upload(h: &Harness, name: &str, kind: FileKind, mime: &str, bytes: &[u8]) -> SourceFile {
        let url = h.blobs.insert(&format!("uploads/{}", name), bytes.to_vec());
        let file = SourceFile::new(name, kind, url, "quinn")
            .with_size(bytes.len() as i64)
            .with_mime_type(mime);
        h.db.create_source_file(&file).unwrap();
        file
    }

    fn tasks_of(h: &Harness, source_id: &str, kind: TaskKind) -> Vec<kiln_core::ProcessingTask> {
        h.db.list_tasks(Some(source_id))
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == kind)
            .collect()
    }

    #[tokio::test]
    async fn test_manual_pdf_end_to_end() {
        let h = harness(full_script(), no_layout());
        let body = "Pump manual text. ".repeat(278);
        let file = upload(&h, "manual_v1.pdf", FileKind::Document, "application/pdf", body.as_bytes());

        let report = h.orchestrator.process(&file.id).await.unwrap();

        assert_eq!(report.status, FileStatus::Completed);
        assert_eq!(report.method, Some(MethodTag::PdfParse));
        assert_eq!(report.extracted_chars, body.chars().count());
        assert!(report.failed_stages.is_empty());
        assert_eq!(h.db.get_source_file(&file.id).unwrap().status, FileStatus::Completed);

        // Layout was gated in by name but the probe said no
        assert!(h.layout.calls.lock().unwrap().is_empty());

        let items = h
            .db
            .list_knowledge_items(&KnowledgeFilter::new().for_source(&file.id))
            .unwrap();
        assert_eq!(items.len(), 3);
        let mut items = items;
        items.sort_by(|a, b| a.title.cmp(&b.title));
        assert_eq!(items[0].title, "manual_v1.pdf - segment 1");
        assert!(items[0].summary.as_deref().unwrap().chars().count() <= 200);
        assert_eq!(
            items[0].tags.as_deref().unwrap(),
            &["pump", "maintenance", "seal", "torque", "safety"]
        );
        assert!(items[1].summary.is_none() && items[1].tags.is_none());
        assert!(items.iter().all(|i| i.status == ReviewStatus::Draft && i.created_by == "quinn"));

        let pairs = h.db.list_qa_pairs(Some(&file.id)).unwrap();
        assert_eq!(pairs.len(), 5);

        let tasks = h.db.list_tasks(Some(&file.id)).unwrap();
        assert_eq!(tasks.len(), 4);
        assert!(tasks
            .iter()
            .all(|t| t.status == TaskStatus::Completed && t.progress == 100 && t.completed_at.is_some()));
        let extraction = &tasks_of(&h, &file.id, TaskKind::Extraction)[0];
        let result = extraction.result.as_ref().unwrap();
        assert_eq!(result["method"], "pdf-parse");
        assert_eq!(result["chars"], body.chars().count());
        assert_eq!(result["pages"], 3);
    }

    #[tokio::test]
    async fn test_unreadable_pdf_without_url_fails() {
        let h = harness(full_script(), no_layout());
        let file = upload(&h, "scan.pdf", FileKind::Document, "application/pdf", b"");

        let report = h.orchestrator.process(&file.id).await.unwrap();

        assert_eq!(report.status, FileStatus::Failed);
        assert_eq!(report.error.as_deref(), Some(&*format!("Extraction failed: {}", NO_URL_FOR_OCR)));
        assert_eq!(h.db.get_source_file(&file.id).unwrap().status, FileStatus::Failed);
        assert!(h
            .db
            .list_knowledge_items(&KnowledgeFilter::new().for_source(&file.id))
            .unwrap()
            .is_empty());
        assert!(h.db.list_qa_pairs(Some(&file.id)).unwrap().is_empty());

        // Only the extraction task exists, and it is closed
        let tasks = h.db.list_tasks(Some(&file.id)).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Failed);
        assert!(tasks[0].completed_at.is_some());
        assert_eq!(h.generator.calls().len(), 0);
    }

    #[tokio::test]
    async fn test_scanned_pdf_with_url_falls_back_to_ocr() {
        let generator = full_script().with_reply(None, "Text read from the scanned pages. ".repeat(5));
        let h = harness(generator, no_layout());

        let url = "https://cdn.example.com/uploads/scan.pdf";
        h.blobs.insert_url(url, b"".to_vec());
        let file = SourceFile::new("scan.pdf", FileKind::Document, url, "quinn")
            .with_mime_type("application/pdf");
        h.db.create_source_file(&file).unwrap();

        let report = h.orchestrator.process(&file.id).await.unwrap();

        assert_eq!(report.status, FileStatus::Completed);
        assert_eq!(report.method, Some(MethodTag::LlmOcr));
        assert_eq!(tasks_of(&h, &file.id, TaskKind::Extraction)[0].status, TaskStatus::Failed);
        assert_eq!(tasks_of(&h, &file.id, TaskKind::Ocr)[0].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_research_paper_tries_layout_before_structured() {
        let layout = StubLayout {
            available: true,
            reply: None,
            calls: Mutex::new(vec![]),
        };
        let h = harness(full_script(), layout);
        let body = "Abstract. ".repeat(50);
        let file = upload(&h, "research_paper.pdf", FileKind::Document, "application/pdf", body.as_bytes());

        let report = h.orchestrator.process(&file.id).await.unwrap();

        assert_eq!(*h.layout.calls.lock().unwrap(), vec!["research_paper.pdf".to_string()]);
        assert_eq!(report.method, Some(MethodTag::PdfParse));
        assert_eq!(report.status, FileStatus::Completed);
    }

    #[tokio::test]
    async fn test_layout_success_uses_markdown() {
        let layout = StubLayout {
            available: true,
            reply: Some("# Thesis\n\nChapter one.".to_string()),
            calls: Mutex::new(vec![]),
        };
        let h = harness(full_script(), layout);
        let file = upload(&h, "thesis.pdf", FileKind::Document, "application/pdf", b"%PDF-1.7");

        let report = h.orchestrator.process(&file.id).await.unwrap();
        assert_eq!(report.method, Some(MethodTag::Mineru));
        let extraction = &tasks_of(&h, &file.id, TaskKind::Extraction)[0];
        assert_eq!(extraction.result.as_ref().unwrap()["method"], "mineru");
    }

    #[tokio::test]
    async fn test_empty_image_ocr_fails_before_derivation() {
        let generator = full_script().with_reply(None, "");
        let h = harness(generator, no_layout());
        let file = SourceFile::new("board.png", FileKind::Image, "https://cdn.example.com/board.png", "quinn")
            .with_mime_type("image/png");
        h.db.create_source_file(&file).unwrap();

        let report = h.orchestrator.process(&file.id).await.unwrap();

        assert_eq!(report.status, FileStatus::Failed);
        assert_eq!(tasks_of(&h, &file.id, TaskKind::Ocr).len(), 1);
        assert!(tasks_of(&h, &file.id, TaskKind::Asr).is_empty());
        assert!(tasks_of(&h, &file.id, TaskKind::Summarization).is_empty());
        assert_eq!(h.generator.call_count(Some("document_summary")), 0);
    }

    #[tokio::test]
    async fn test_audio_uses_transcription() {
        let generator = full_script().with_reply(None, "Welcome to the weekly sync.");
        let h = harness(generator, no_layout());
        let file = SourceFile::new("sync.mp3", FileKind::Audio, "https://cdn.example.com/sync.mp3", "quinn")
            .with_mime_type("audio/mpeg");
        h.db.create_source_file(&file).unwrap();

        let report = h.orchestrator.process(&file.id).await.unwrap();
        assert_eq!(report.method, Some(MethodTag::LlmAsr));
        assert_eq!(tasks_of(&h, &file.id, TaskKind::Asr)[0].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_segmentation_failure_falls_back_to_whole_text() {
        let generator = ScriptedGenerator::new()
            .with_reply(Some("document_summary"), r#"{"summary": "s"}"#)
            .with_reply(Some("keyword_extraction"), r#"{"keywords": ["k"]}"#)
            .with_reply(Some("text_segmentation"), "not json")
            .with_failure(Some("qa_generation"), "rate limited");
        let h = harness(generator, no_layout());
        let body = "Whole document body. ".repeat(10);
        let file = upload(&h, "notes.pdf", FileKind::Document, "application/pdf", body.as_bytes());

        let report = h.orchestrator.process(&file.id).await.unwrap();

        // Partial success: derivation failures only fail their own tasks
        assert_eq!(report.status, FileStatus::Completed);
        assert_eq!(
            report.failed_stages,
            vec![TaskKind::Segmentation, TaskKind::QaGeneration]
        );

        let items = h
            .db
            .list_knowledge_items(&KnowledgeFilter::new().for_source(&file.id))
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, body);

        let qa = &tasks_of(&h, &file.id, TaskKind::QaGeneration)[0];
        assert_eq!(qa.status, TaskStatus::Failed);
        assert!(qa.error_message.as_deref().unwrap().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_tags_round_trip_through_store() {
        let h = harness(full_script(), no_layout());
        let body = "Pump manual text. ".repeat(20);
        let file = upload(&h, "pump.pdf", FileKind::Document, "application/pdf", body.as_bytes());
        h.orchestrator.process(&file.id).await.unwrap();

        let items = h
            .db
            .list_knowledge_items(&KnowledgeFilter::new().for_source(&file.id))
            .unwrap();
        let tagged = items.iter().find(|i| i.tags.is_some()).unwrap();
        let encoded = tagged.tags_json().unwrap().unwrap();
        assert_eq!(
            KnowledgeItem::parse_tags(&encoded).unwrap(),
            vec!["pump", "maintenance", "seal", "torque", "safety"]
        );
    }

    #[tokio::test]
    async fn test_second_run_is_refused() {
        let h = harness(full_script(), no_layout());
        let body = "Pump manual text. ".repeat(20);
        let file = upload(&h, "pump.pdf", FileKind::Document, "application/pdf", body.as_bytes());

        h.orchestrator.process(&file.id).await.unwrap();
        let second = h.orchestrator.process(&file.id).await;
        assert!(matches!(second, Err(PipelineError::NotClaimable { .. })));
        assert_eq!(h.db.list_tasks(Some(&file.id)).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_abandon_settles_unclaimed_and_terminal_files() {
        let h = harness(full_script(), no_layout());
        let file = upload(&h, "never_claimed.pdf", FileKind::Document, "application/pdf", b"x");

        h.orchestrator.abandon(&file.id, "job failed before processing").unwrap();
        assert_eq!(h.db.get_source_file(&file.id).unwrap().status, FileStatus::Failed);

        // A second abandon is a no-op
        h.orchestrator.abandon(&file.id, "again").unwrap();
        assert_eq!(h.db.get_source_file(&file.id).unwrap().status, FileStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_blob_fails_file() {
        let h = harness(full_script(), no_layout());
        let file = SourceFile::new("gone.pdf", FileKind::Document, "memory://gone.pdf", "quinn");
        h.db.create_source_file(&file).unwrap();

        let report = h.orchestrator.process(&file.id).await.unwrap();
        assert_eq!(report.status, FileStatus::Failed);

        // The read failure lands on the extraction task
        let extraction = &tasks_of(&h, &file.id, TaskKind::Extraction)[0];
        assert_eq!(extraction.status, TaskStatus::Failed);
        assert!(extraction.error_message.as_deref().unwrap().contains("no blob"));
        assert_eq!(h.generator.calls().len(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_blob_with_url_still_reaches_ocr() {
        let generator = full_script().with_reply(None, "Text read from the scanned pages. ".repeat(5));
        let h = harness(generator, no_layout());
        let file = SourceFile::new("scan.pdf", FileKind::Document, "https://cdn.example.com/scan.pdf", "quinn")
            .with_mime_type("application/pdf");
        h.db.create_source_file(&file).unwrap();

        let report = h.orchestrator.process(&file.id).await.unwrap();

        assert_eq!(report.status, FileStatus::Completed);
        assert_eq!(report.method, Some(MethodTag::LlmOcr));
        let extraction = &tasks_of(&h, &file.id, TaskKind::Extraction)[0];
        assert_eq!(extraction.status, TaskStatus::Failed);
        assert!(extraction
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("file could not be read"));
        assert_eq!(tasks_of(&h, &file.id, TaskKind::Ocr)[0].status, TaskStatus::Completed);
    }

    /// Orchestrator over a directory-backed store with no public URL.
    fn local_orchestrator(db: &Database, blobs: &crate::blob::FsBlobStore, generator: &ScriptedGenerator) -> Orchestrator {
        let llm: Arc<dyn kiln_llm::Generator> = Arc::new(generator.clone());
        let selector = ExtractionSelector::new(&ExtractionConfig::default(), llm.clone(), None);
        let deriver = Deriver::new(llm, DerivationConfig::default());
        Orchestrator::new(db.clone(), Arc::new(blobs.clone()), selector, deriver)
    }

    fn image_url(request: &kiln_llm::GenerationRequest) -> Option<String> {
        match &request.messages[0].content {
            kiln_llm::MessageContent::Parts(parts) => parts.iter().find_map(|part| {
                let value = serde_json::to_value(part).ok()?;
                value["image_url"]["url"].as_str().map(str::to_string)
            }),
            kiln_llm::MessageContent::Text(_) => None,
        }
    }

    #[tokio::test]
    async fn test_local_image_is_sent_inline() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = crate::blob::FsBlobStore::new(dir.path(), None, 1024 * 1024);
        let db = Database::open_in_memory().unwrap();
        let generator = full_script().with_reply(None, "Whiteboard: ship the pump firmware on Friday.");
        let orchestrator = local_orchestrator(&db, &blobs, &generator);

        let url = blobs.put("uploads/board.png", b"\x89PNG", "image/png").await.unwrap();
        assert!(url.starts_with("file://"));
        let file = SourceFile::new("board.png", FileKind::Image, url, "quinn").with_mime_type("image/png");
        db.create_source_file(&file).unwrap();

        let report = orchestrator.process(&file.id).await.unwrap();

        assert_eq!(report.status, FileStatus::Completed);
        assert_eq!(report.method, Some(MethodTag::LlmOcr));
        let sent = generator
            .calls()
            .iter()
            .find_map(image_url)
            .unwrap();
        assert_eq!(sent, "data:image/png;base64,iVBORw==");
    }

    #[tokio::test]
    async fn test_inline_limit_applies_to_local_media() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = crate::blob::FsBlobStore::new(dir.path(), None, 1024 * 1024);
        let db = Database::open_in_memory().unwrap();
        let generator = full_script().with_reply(None, "unused");
        let orchestrator = local_orchestrator(&db, &blobs, &generator).with_inline_limit(4);

        let url = blobs.put("uploads/sync.mp3", &[7u8; 16], "audio/mpeg").await.unwrap();
        let file = SourceFile::new("sync.mp3", FileKind::Audio, url, "quinn").with_mime_type("audio/mpeg");
        db.create_source_file(&file).unwrap();

        let report = orchestrator.process(&file.id).await.unwrap();

        assert_eq!(report.status, FileStatus::Failed);
        assert!(report.error.unwrap().contains("requires a file URL"));
        assert!(generator.calls().is_empty());
    }
}
