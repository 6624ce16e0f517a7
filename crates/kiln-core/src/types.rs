//! Core domain types for Kiln.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for source files.
pub type SourceId = String;

/// Unique identifier for processing tasks.
pub type TaskId = String;

/// Unique identifier for knowledge items.
pub type KnowledgeId = String;

/// Unique identifier for QA pairs.
pub type QaPairId = String;

/// Generate a new unique ID.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Kind of uploaded asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Document,
    Image,
    Video,
    Audio,
    Other,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Document => "document",
            FileKind::Image => "image",
            FileKind::Video => "video",
            FileKind::Audio => "audio",
            FileKind::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "document" => Some(FileKind::Document),
            "image" => Some(FileKind::Image),
            "video" => Some(FileKind::Video),
            "audio" => Some(FileKind::Audio),
            "other" => Some(FileKind::Other),
            _ => None,
        }
    }

    /// Detect the kind from a file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "mp4" | "mov" | "mkv" | "webm" | "avi" | "m4v" => FileKind::Video,
            "mp3" | "wav" | "m4a" | "flac" | "ogg" | "aac" => FileKind::Audio,
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "tif" | "tiff" => FileKind::Image,
            "pdf" | "doc" | "docx" | "odt" | "rtf" | "md" | "markdown" | "txt" | "text"
            | "html" | "htm" | "csv" | "json" => FileKind::Document,
            _ => FileKind::Other,
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Guess a media type from a file extension.
pub fn media_type_for_extension(ext: &str) -> Option<&'static str> {
    let media = match ext.to_lowercase().as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "odt" => "application/vnd.oasis.opendocument.text",
        "rtf" => "application/rtf",
        "md" | "markdown" => "text/markdown",
        "txt" | "text" => "text/plain",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "aac" => "audio/aac",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        _ => return None,
    };
    Some(media)
}

/// Media type used when nothing better is known.
pub const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

/// Aggregate processing status of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(FileStatus::Pending),
            "processing" => Some(FileStatus::Processing),
            "completed" => Some(FileStatus::Completed),
            "failed" => Some(FileStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Completed | FileStatus::Failed)
    }

    /// Whether the pipeline may move a file from `self` to `next`.
    ///
    /// Only `pending -> processing` and `processing -> completed | failed`
    /// are allowed; terminal states never change.
    pub fn can_transition_to(&self, next: FileStatus) -> bool {
        matches!(
            (self, next),
            (FileStatus::Pending, FileStatus::Processing)
                | (FileStatus::Processing, FileStatus::Completed)
                | (FileStatus::Processing, FileStatus::Failed)
        )
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An uploaded asset awaiting or undergoing processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: SourceId,
    pub name: String,
    pub kind: FileKind,
    pub file_url: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub uploaded_by: String,
    pub department: Option<String>,
    pub content_hash: Option<String>,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SourceFile {
    pub fn new(
        name: impl Into<String>,
        kind: FileKind,
        file_url: impl Into<String>,
        uploaded_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.into(),
            kind,
            file_url: file_url.into(),
            file_size: 0,
            mime_type: None,
            uploaded_by: uploaded_by.into(),
            department: None,
            content_hash: None,
            status: FileStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.file_size = size;
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    /// Lowercased extension of the display name, if any.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    }

    /// The declared media type, else one guessed from the name, else
    /// `application/octet-stream`. Never empty.
    pub fn effective_media_type(&self) -> String {
        if let Some(mime) = self.mime_type.as_deref().filter(|m| !m.trim().is_empty()) {
            return mime.to_string();
        }
        self.extension()
            .and_then(|ext| media_type_for_extension(&ext))
            .unwrap_or(FALLBACK_MEDIA_TYPE)
            .to_string()
    }

    /// Whether the media type marks this file as a PDF.
    pub fn is_pdf(&self) -> bool {
        self.effective_media_type().to_lowercase().contains("pdf")
    }
}

/// Pipeline stage a processing task records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Extraction,
    Ocr,
    Asr,
    Segmentation,
    Summarization,
    QaGeneration,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Extraction => "extraction",
            TaskKind::Ocr => "ocr",
            TaskKind::Asr => "asr",
            TaskKind::Segmentation => "segmentation",
            TaskKind::Summarization => "summarization",
            TaskKind::QaGeneration => "qa_generation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "extraction" => Some(TaskKind::Extraction),
            "ocr" => Some(TaskKind::Ocr),
            "asr" => Some(TaskKind::Asr),
            "segmentation" => Some(TaskKind::Segmentation),
            "summarization" => Some(TaskKind::Summarization),
            "qa_generation" => Some(TaskKind::QaGeneration),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a processing task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recorded attempt at a single pipeline stage for one source file.
///
/// `progress` never decreases and `completed_at` is set exactly when the
/// status is terminal. Once terminal the task no longer changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub id: TaskId,
    pub source_id: SourceId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessingTask {
    pub fn new(source_id: impl Into<SourceId>, kind: TaskKind, created_by: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            source_id: source_id.into(),
            kind,
            status: TaskStatus::Pending,
            progress: 0,
            result: None,
            error_message: None,
            created_by: created_by.into(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Move a pending task to processing.
    pub fn start(&mut self) {
        if self.status == TaskStatus::Pending {
            self.status = TaskStatus::Processing;
        }
    }

    /// Raise progress to `progress` (capped at 100). Lower values are ignored.
    pub fn advance(&mut self, progress: u8) {
        if self.status.is_terminal() {
            return;
        }
        self.progress = self.progress.max(progress.min(100));
    }

    pub fn complete(&mut self, result: Option<serde_json::Value>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.result = result;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
    }
}

/// Intended downstream use of a knowledge item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeType {
    #[default]
    Rag,
    Sft,
    Pretrain,
    Multimodal,
}

impl KnowledgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeType::Rag => "rag",
            KnowledgeType::Sft => "sft",
            KnowledgeType::Pretrain => "pretrain",
            KnowledgeType::Multimodal => "multimodal",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rag" => Some(KnowledgeType::Rag),
            "sft" => Some(KnowledgeType::Sft),
            "pretrain" => Some(KnowledgeType::Pretrain),
            "multimodal" => Some(KnowledgeType::Multimodal),
            _ => None,
        }
    }
}

impl std::fmt::Display for KnowledgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Review state shared by knowledge items and QA pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    #[default]
    Draft,
    Reviewed,
    Published,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Draft => "draft",
            ReviewStatus::Reviewed => "reviewed",
            ReviewStatus::Published => "published",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(ReviewStatus::Draft),
            "reviewed" => Some(ReviewStatus::Reviewed),
            "published" => Some(ReviewStatus::Published),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A derived, reviewable text segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: KnowledgeId,
    pub source_id: SourceId,
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub knowledge_type: KnowledgeType,
    pub status: ReviewStatus,
    pub created_by: String,
    pub reviewed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeItem {
    /// Create a draft item. Fails when `content` is blank.
    pub fn new(
        source_id: impl Into<SourceId>,
        title: impl Into<String>,
        content: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Result<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(Error::InvalidInput(
                "knowledge item content must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: new_id(),
            source_id: source_id.into(),
            title: title.into(),
            content,
            summary: None,
            category: None,
            tags: None,
            knowledge_type: KnowledgeType::Rag,
            status: ReviewStatus::Draft,
            created_by: created_by.into(),
            reviewed_by: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn with_knowledge_type(mut self, knowledge_type: KnowledgeType) -> Self {
        self.knowledge_type = knowledge_type;
        self
    }

    /// Tags encoded as a JSON array, as stored.
    pub fn tags_json(&self) -> Result<Option<String>> {
        self.tags
            .as_ref()
            .map(|tags| serde_json::to_string(tags).map_err(Error::from))
            .transpose()
    }

    /// Decode a stored JSON tag array.
    pub fn parse_tags(raw: &str) -> Result<Vec<String>> {
        serde_json::from_str(raw).map_err(Error::from)
    }
}

/// A derived question/answer unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaPair {
    pub id: QaPairId,
    /// Owning knowledge or source id.
    pub knowledge_id: String,
    pub question: String,
    pub answer: String,
    pub status: ReviewStatus,
    pub created_by: String,
    pub reviewed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QaPair {
    pub fn new(
        knowledge_id: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            knowledge_id: knowledge_id.into(),
            question: question.into(),
            answer: answer.into(),
            status: ReviewStatus::Draft,
            created_by: created_by.into(),
            reviewed_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Filter for listing knowledge items.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeFilter {
    pub source_id: Option<SourceId>,
    pub knowledge_type: Option<KnowledgeType>,
    pub status: Option<ReviewStatus>,
}

impl KnowledgeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_source(mut self, source_id: impl Into<SourceId>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_type(mut self, knowledge_type: KnowledgeType) -> Self {
        self.knowledge_type = Some(knowledge_type);
        self
    }

    pub fn with_status(mut self, status: ReviewStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Status of a queued pipeline job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    #[default]
    Pending,
    Processing,
    Done,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Done => "done",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(QueueStatus::Pending),
            "processing" => Some(QueueStatus::Processing),
            "done" => Some(QueueStatus::Done),
            "failed" => Some(QueueStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pipeline run waiting in, or claimed from, the work queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub source_id: SourceId,
    pub status: QueueStatus,
    pub priority: i32,
    pub attempts: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn new(source_id: impl Into<SourceId>) -> Self {
        Self {
            id: new_id(),
            source_id: source_id.into(),
            status: QueueStatus::Pending,
            priority: 0,
            attempts: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Statistics about the datastore.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub total_sources: i64,
    pub sources_by_status: HashMap<String, i64>,
    pub sources_by_kind: HashMap<String, i64>,
    pub total_tasks: i64,
    pub failed_tasks: i64,
    pub total_knowledge_items: i64,
    pub total_qa_pairs: i64,
    pub queue_pending: i64,
    pub queue_processing: i64,
    pub queue_failed: i64,
    pub database_size_bytes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(FileKind::from_extension("PDF"), FileKind::Document);
        assert_eq!(FileKind::from_extension("png"), FileKind::Image);
        assert_eq!(FileKind::from_extension("mp3"), FileKind::Audio);
        assert_eq!(FileKind::from_extension("mkv"), FileKind::Video);
        assert_eq!(FileKind::from_extension("xyz"), FileKind::Other);
    }

    #[test]
    fn test_effective_media_type() {
        let declared = SourceFile::new("scan.png", FileKind::Image, "file:///a", "u")
            .with_mime_type("image/png");
        assert_eq!(declared.effective_media_type(), "image/png");

        let guessed = SourceFile::new("Paper.PDF", FileKind::Document, "file:///b", "u");
        assert_eq!(guessed.effective_media_type(), "application/pdf");
        assert!(guessed.is_pdf());

        let unknown = SourceFile::new("blob", FileKind::Other, "file:///c", "u");
        assert_eq!(unknown.effective_media_type(), FALLBACK_MEDIA_TYPE);
    }

    #[test]
    fn test_file_status_transitions() {
        assert!(FileStatus::Pending.can_transition_to(FileStatus::Processing));
        assert!(FileStatus::Processing.can_transition_to(FileStatus::Completed));
        assert!(FileStatus::Processing.can_transition_to(FileStatus::Failed));
        assert!(!FileStatus::Completed.can_transition_to(FileStatus::Pending));
        assert!(!FileStatus::Failed.can_transition_to(FileStatus::Processing));
        assert!(!FileStatus::Pending.can_transition_to(FileStatus::Completed));
    }

    #[test]
    fn test_task_lifecycle() {
        let mut task = ProcessingTask::new("src", TaskKind::Extraction, "alice");
        assert_eq!(task.status, TaskStatus::Pending);

        task.start();
        task.advance(40);
        task.advance(10);
        assert_eq!(task.progress, 40);
        assert!(task.completed_at.is_none());

        task.complete(Some(serde_json::json!({"method": "pdf-parse"})));
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert!(task.completed_at.is_some());

        // Terminal tasks are immutable
        task.fail("late failure");
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.error_message.is_none());
    }

    #[test]
    fn test_task_kind_names() {
        assert_eq!(TaskKind::QaGeneration.as_str(), "qa_generation");
        assert_eq!(TaskKind::from_str("qa_generation"), Some(TaskKind::QaGeneration));
        assert_eq!(TaskKind::from_str("bogus"), None);
    }

    #[test]
    fn test_knowledge_item_rejects_empty_content() {
        assert!(KnowledgeItem::new("src", "t", "   ", "u").is_err());
        assert!(KnowledgeItem::new("src", "t", "body", "u").is_ok());
    }

    #[test]
    fn test_tags_roundtrip_preserves_order() {
        let keywords = vec!["zeta".to_string(), "alpha".to_string(), "知识".to_string()];
        let item = KnowledgeItem::new("src", "t", "body", "u")
            .unwrap()
            .with_tags(keywords.clone());

        let raw = item.tags_json().unwrap().unwrap();
        assert_eq!(KnowledgeItem::parse_tags(&raw).unwrap(), keywords);
    }
}
