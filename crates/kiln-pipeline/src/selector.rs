//! Extraction strategy selection and the fallback chain.

use kiln_config::ExtractionConfig;
use kiln_core::{FileKind, SourceFile, TaskKind};
use kiln_extract::{
    should_use_layout, ExtractionInput, ExtractionOutcome, ExtractionStrategy, LayoutConverter,
    LayoutStrategy, LlmOcr, LlmTranscriber, MethodTag, ParserRegistry, StructuredExtractor,
};
use kiln_llm::Generator;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reported when a document defeats every local strategy and there is no
/// URL to hand to OCR.
pub const NO_URL_FOR_OCR: &str = "document likely unreadable without a URL for OCR fallback";

/// One tracked step of a plan: a task kind and the strategies tried under it.
#[derive(Clone)]
pub struct PlanStage {
    pub task: TaskKind,
    strategies: Vec<Arc<dyn ExtractionStrategy>>,
}

impl PlanStage {
    fn new(task: TaskKind, strategies: Vec<Arc<dyn ExtractionStrategy>>) -> Self {
        Self { task, strategies }
    }

    pub fn methods(&self) -> Vec<MethodTag> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    /// Try each strategy once, in order; the first success wins.
    ///
    /// On failure the returned outcome carries every strategy's reason.
    pub async fn run(&self, input: &ExtractionInput<'_>) -> ExtractionOutcome {
        let mut reasons = Vec::new();
        let mut last_method = self
            .strategies
            .first()
            .map(|s| s.method())
            .unwrap_or(MethodTag::Structured);

        for strategy in &self.strategies {
            let outcome = strategy.extract(input).await;
            match outcome {
                ExtractionOutcome::Text { ref text, method, .. } if text.trim().is_empty() => {
                    warn!("{} produced no text for {}", method, input.filename);
                    reasons.push(format!("{}: produced no text", method));
                    last_method = method;
                }
                ExtractionOutcome::Text { .. } => {
                    debug!("{} succeeded for {}", outcome.method(), input.filename);
                    return outcome;
                }
                ExtractionOutcome::Failed { reason, method } => {
                    warn!("{} failed for {}: {}", method, input.filename, reason);
                    reasons.push(format!("{}: {}", method, reason));
                    last_method = method;
                }
            }
        }

        ExtractionOutcome::failed(reasons.join("; "), last_method)
    }
}

/// Ordered stages for one file, plus the message to report if all fail.
#[derive(Clone)]
pub struct ExtractionPlan {
    pub stages: Vec<PlanStage>,
    exhausted: Option<String>,
}

impl ExtractionPlan {
    /// Every planned method in attempt order.
    pub fn methods(&self) -> Vec<MethodTag> {
        self.stages.iter().flat_map(|s| s.methods()).collect()
    }

    /// Terminal error for when every stage failed. `None` means the last
    /// stage's own reason should be reported.
    pub fn exhausted_reason(&self) -> Option<&str> {
        self.exhausted.as_deref()
    }
}

/// Layout gating settings.
#[derive(Debug, Clone)]
struct LayoutGate {
    max_bytes: u64,
    keywords: Vec<String>,
}

/// Picks and orders extraction strategies by file kind.
#[derive(Clone)]
pub struct ExtractionSelector {
    structured: Arc<dyn ExtractionStrategy>,
    layout: Option<LayoutStrategy>,
    ocr: Arc<dyn ExtractionStrategy>,
    transcriber: Arc<dyn ExtractionStrategy>,
    gate: LayoutGate,
}

impl ExtractionSelector {
    /// Build the standard selector: default parsers, OCR and transcription over
    /// `generator`, and layout conversion through `layout` when enabled.
    pub fn new(
        config: &ExtractionConfig,
        generator: Arc<dyn Generator>,
        layout: Option<Arc<dyn LayoutConverter>>,
    ) -> Self {
        Self {
            structured: Arc::new(StructuredExtractor::new(
                ParserRegistry::default(),
                config.min_text_chars,
            )),
            layout: layout
                .filter(|_| config.layout_enabled)
                .map(LayoutStrategy::new),
            ocr: Arc::new(LlmOcr::new(generator.clone())),
            transcriber: Arc::new(LlmTranscriber::new(generator)),
            gate: LayoutGate {
                max_bytes: config.layout_max_bytes,
                keywords: config.layout_keywords.clone(),
            },
        }
    }

    /// Replace the structured-document strategy.
    pub fn with_structured(mut self, strategy: Arc<dyn ExtractionStrategy>) -> Self {
        self.structured = strategy;
        self
    }

    /// Decide which strategies to try, and in which order, for `file`.
    ///
    /// Probes the layout converter when the file passes the gate.
    pub async fn plan(&self, file: &SourceFile, has_url: bool) -> ExtractionPlan {
        match file.kind {
            FileKind::Document => self.plan_document(file, has_url).await,
            FileKind::Image => ExtractionPlan {
                stages: vec![PlanStage::new(TaskKind::Ocr, vec![self.ocr.clone()])],
                exhausted: None,
            },
            FileKind::Video | FileKind::Audio => ExtractionPlan {
                stages: vec![PlanStage::new(TaskKind::Asr, vec![self.transcriber.clone()])],
                exhausted: None,
            },
            FileKind::Other => ExtractionPlan {
                stages: vec![],
                exhausted: Some(format!("no extraction path for {} files", file.kind)),
            },
        }
    }

    async fn plan_document(&self, file: &SourceFile, has_url: bool) -> ExtractionPlan {
        let mut direct: Vec<Arc<dyn ExtractionStrategy>> = Vec::new();

        if let Some(layout) = self.layout_for(file).await {
            direct.push(Arc::new(layout));
        }
        direct.push(self.structured.clone());

        let mut stages = vec![PlanStage::new(TaskKind::Extraction, direct)];
        let exhausted = if has_url {
            stages.push(PlanStage::new(TaskKind::Ocr, vec![self.ocr.clone()]));
            None
        } else {
            Some(NO_URL_FOR_OCR.to_string())
        };

        ExtractionPlan { stages, exhausted }
    }

    async fn layout_for(&self, file: &SourceFile) -> Option<LayoutStrategy> {
        let layout = self.layout.as_ref()?;
        let size = u64::try_from(file.file_size).unwrap_or(0);

        if !file.is_pdf() || !should_use_layout(&file.name, size, self.gate.max_bytes, &self.gate.keywords) {
            return None;
        }

        if !layout.is_available().await {
            info!("Layout converter unavailable, skipping it for {}", file.name);
            return None;
        }

        info!("Using layout conversion for {}", file.name);
        Some(layout.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_extract::{ExtractResult, LayoutOutput};
    use kiln_llm::testing::ScriptedGenerator;
    use std::time::Duration;

    struct StubLayout {
        available: bool,
    }

    #[async_trait::async_trait]
    impl LayoutConverter for StubLayout {
        async fn is_available(&self) -> bool {
            self.available
        }

        async fn convert(&self, _pdf: &[u8], _filename: &str) -> ExtractResult<LayoutOutput> {
            Ok(LayoutOutput {
                markdown: "# Converted".to_string(),
                json: None,
                elapsed: Duration::from_millis(1),
            })
        }
    }

    fn selector(layout_available: bool) -> ExtractionSelector {
        ExtractionSelector::new(
            &ExtractionConfig::default(),
            Arc::new(ScriptedGenerator::new()),
            Some(Arc::new(StubLayout {
                available: layout_available,
            })),
        )
    }

    fn pdf(name: &str, size: i64) -> SourceFile {
        SourceFile::new(name, FileKind::Document, format!("memory://{}", name), "ops")
            .with_size(size)
            .with_mime_type("application/pdf")
    }

    #[tokio::test]
    async fn test_gated_pdf_tries_layout_first() {
        let plan = selector(true).plan(&pdf("research_paper.pdf", 2_000_000), true).await;
        assert_eq!(
            plan.methods(),
            vec![MethodTag::Mineru, MethodTag::Structured, MethodTag::LlmOcr]
        );
        assert_eq!(plan.stages[0].task, TaskKind::Extraction);
        assert_eq!(plan.stages[1].task, TaskKind::Ocr);
    }

    #[tokio::test]
    async fn test_ungated_pdf_starts_with_structured() {
        let plan = selector(true).plan(&pdf("invoice_march.pdf", 2_000_000), true).await;
        assert_eq!(plan.methods(), vec![MethodTag::Structured, MethodTag::LlmOcr]);

        let oversized = selector(true)
            .plan(&pdf("research_paper.pdf", 60 * 1024 * 1024), true)
            .await;
        assert_eq!(oversized.methods()[0], MethodTag::Structured);
    }

    #[tokio::test]
    async fn test_unavailable_layout_is_skipped() {
        let plan = selector(false).plan(&pdf("manual_v1.pdf", 2_000_000), true).await;
        assert_eq!(plan.methods(), vec![MethodTag::Structured, MethodTag::LlmOcr]);
    }

    #[tokio::test]
    async fn test_no_url_means_no_ocr_stage() {
        let plan = selector(false).plan(&pdf("scan.pdf", 200_000), false).await;
        assert_eq!(plan.methods(), vec![MethodTag::Structured]);
        assert_eq!(plan.exhausted_reason(), Some(NO_URL_FOR_OCR));
    }

    #[tokio::test]
    async fn test_kind_routing() {
        let selector = selector(true);

        let image = SourceFile::new("board.png", FileKind::Image, "memory://board.png", "ops")
            .with_mime_type("image/png");
        let plan = selector.plan(&image, true).await;
        assert_eq!(plan.methods(), vec![MethodTag::LlmOcr]);
        assert_eq!(plan.stages[0].task, TaskKind::Ocr);

        let audio = SourceFile::new("call.mp3", FileKind::Audio, "memory://call.mp3", "ops");
        let plan = selector.plan(&audio, true).await;
        assert_eq!(plan.methods(), vec![MethodTag::LlmAsr]);
        assert_eq!(plan.stages[0].task, TaskKind::Asr);

        let other = SourceFile::new("data.bin", FileKind::Other, "memory://data.bin", "ops");
        let plan = selector.plan(&other, true).await;
        assert!(plan.stages.is_empty());
        assert!(plan.exhausted_reason().is_some());
    }

    #[tokio::test]
    async fn test_stage_collects_every_reason() {
        let plan = selector(true).plan(&pdf("research_paper.pdf", 10), false).await;
        let input = ExtractionInput {
            bytes: None,
            url: None,
            filename: "research_paper.pdf",
            media_type: "application/pdf",
        };

        let outcome = plan.stages[0].run(&input).await;
        let ExtractionOutcome::Failed { reason, .. } = outcome else {
            panic!("expected failure without bytes");
        };
        assert!(reason.contains("mineru:"));
        assert!(reason.contains("structured:"));
    }
}
