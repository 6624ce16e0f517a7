//! Upload flow: store the bytes, record the source file, queue the job.

use crate::blob::BlobStore;
use crate::error::{PipelineError, PipelineResult};
use crate::worker::WorkerHandle;
use chrono::Utc;
use kiln_core::{media_type_for_extension, FileKind, QueueItem, SourceFile, FALLBACK_MEDIA_TYPE};
use kiln_db::Database;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Caller-supplied metadata for an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub uploaded_by: String,
    /// Display name; defaults to the file name.
    pub name: Option<String>,
    /// Defaults to a guess from the extension.
    pub kind: Option<FileKind>,
    /// Defaults to a guess from the extension.
    pub mime_type: Option<String>,
    pub department: Option<String>,
    pub priority: i32,
}

impl UploadOptions {
    pub fn new(uploaded_by: impl Into<String>) -> Self {
        Self {
            uploaded_by: uploaded_by.into(),
            ..Default::default()
        }
    }
}

/// Accepts uploads and hands them to the queue without waiting for
/// processing.
#[derive(Clone)]
pub struct Uploader {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    workers: Option<WorkerHandle>,
}

impl Uploader {
    pub fn new(db: Database, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            db,
            blobs,
            workers: None,
        }
    }

    /// Wake in-process workers whenever a job is queued.
    pub fn with_workers(mut self, handle: WorkerHandle) -> Self {
        self.workers = Some(handle);
        self
    }

    /// Upload a file from disk.
    pub async fn upload(&self, path: &Path, options: UploadOptions) -> PipelineResult<SourceFile> {
        if !path.is_file() {
            return Err(PipelineError::FileNotFound(path.to_path_buf()));
        }

        let bytes = tokio::fs::read(path).await?;
        let name = match &options.name {
            Some(name) => name.clone(),
            None => path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("upload")
                .to_string(),
        };

        self.upload_bytes(&name, &bytes, options).await
    }

    /// Upload in-memory bytes under a display name.
    pub async fn upload_bytes(
        &self,
        name: &str,
        bytes: &[u8],
        options: UploadOptions,
    ) -> PipelineResult<SourceFile> {
        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let kind = options
            .kind
            .unwrap_or_else(|| FileKind::from_extension(&extension));
        let mime_type = options.mime_type.clone().unwrap_or_else(|| {
            media_type_for_extension(&extension)
                .unwrap_or(FALLBACK_MEDIA_TYPE)
                .to_string()
        });

        let key = blob_key(name);
        let url = self.blobs.put(&key, bytes, &mime_type).await?;

        let mut file = SourceFile::new(name, kind, url, options.uploaded_by.as_str())
            .with_size(bytes.len() as i64)
            .with_mime_type(mime_type)
            .with_content_hash(sha256_hex(bytes));
        if let Some(department) = options.department {
            file = file.with_department(department);
        }

        let job = QueueItem::new(&file.id).with_priority(options.priority);
        self.db.create_queued_source_file(&file, &job)?;

        if let Some(workers) = &self.workers {
            workers.notify();
        }

        info!("Queued {} ({}, {} bytes) as {}", file.name, file.kind, bytes.len(), file.id);
        Ok(file)
    }
}

/// `uploads/<unix millis>-<name>` with path separators flattened.
fn blob_key(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let safe = safe.trim_start_matches('.');
    format!("uploads/{}-{}", Utc::now().timestamp_millis(), safe)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{FsBlobStore, MemoryBlobStore};
    use kiln_core::FileStatus;

    #[tokio::test]
    async fn test_upload_records_and_queues() {
        let db = Database::open_in_memory().unwrap();
        let blobs = MemoryBlobStore::new();
        let uploader = Uploader::new(db.clone(), Arc::new(blobs.clone()));

        let mut options = UploadOptions::new("sam");
        options.department = Some("maintenance".to_string());
        let file = uploader
            .upload_bytes("manual_v1.pdf", b"%PDF-1.4 body", options)
            .await
            .unwrap();

        assert_eq!(file.kind, FileKind::Document);
        assert_eq!(file.mime_type.as_deref(), Some("application/pdf"));
        assert_eq!(file.file_size, 13);
        assert_eq!(file.status, FileStatus::Pending);
        assert!(file.file_url.starts_with("memory://uploads/"));
        assert!(file.file_url.ends_with("-manual_v1.pdf"));
        assert_eq!(file.content_hash.as_ref().unwrap().len(), 64);

        let stored = db.get_source_file(&file.id).unwrap();
        assert_eq!(stored.department.as_deref(), Some("maintenance"));
        assert!(db.is_queued(&file.id).unwrap());
        assert_eq!(blobs.fetch(&file.file_url).await.unwrap(), b"%PDF-1.4 body");
    }

    #[tokio::test]
    async fn test_upload_from_disk_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let db = Database::open_in_memory().unwrap();
        let blobs = FsBlobStore::new(dir.path().join("blobs"), None, 1024);
        let uploader = Uploader::new(db.clone(), Arc::new(blobs));

        let mut options = UploadOptions::new("sam");
        options.kind = Some(FileKind::Video);
        options.mime_type = Some("video/mp4".to_string());
        let file = uploader.upload(&path, options).await.unwrap();

        assert_eq!(file.name, "clip.bin");
        assert_eq!(file.kind, FileKind::Video);
        assert_eq!(file.effective_media_type(), "video/mp4");
        assert!(file.file_url.starts_with("file://"));
    }

    #[tokio::test]
    async fn test_failed_enqueue_leaves_no_file_record() {
        let db = Database::open_in_memory().unwrap();
        let uploader = Uploader::new(db.clone(), Arc::new(MemoryBlobStore::new()));
        db.conn().unwrap().execute_batch("DROP TABLE queue").unwrap();

        let result = uploader
            .upload_bytes("notes.txt", b"meeting notes", UploadOptions::new("sam"))
            .await;

        assert!(matches!(result, Err(PipelineError::Database(_))));
        assert_eq!(db.count_source_files().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_path_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let uploader = Uploader::new(db, Arc::new(MemoryBlobStore::new()));

        let result = uploader
            .upload(Path::new("/definitely/not/here.pdf"), UploadOptions::new("sam"))
            .await;
        assert!(matches!(result, Err(PipelineError::FileNotFound(_))));
    }

    #[test]
    fn test_blob_key_flattens_paths() {
        let key = blob_key("../etc/passwd");
        assert!(key.starts_with("uploads/"));
        assert!(key.ends_with("-_etc_passwd"));
        assert!(!key["uploads/".len()..].contains('/'));
    }
}
