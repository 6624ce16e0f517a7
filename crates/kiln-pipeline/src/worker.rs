//! Queue workers that run the orchestrator for enqueued files.

use crate::error::{PipelineError, PipelineResult};
use crate::orchestrator::{Orchestrator, ProcessReport};
use chrono::Utc;
use kiln_config::WorkerConfig;
use kiln_core::{FileStatus, QueueItem};
use kiln_db::DbError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Shared wake-up and shutdown signals for a [`WorkerPool`].
#[derive(Clone, Default)]
pub struct WorkerHandle {
    wake: Arc<Notify>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake an idle worker; new work is waiting.
    pub fn notify(&self) {
        self.wake.notify_one();
    }

    /// Ask every worker to stop after its current job.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// A pool of async workers polling the job queue.
#[derive(Clone)]
pub struct WorkerPool {
    orchestrator: Orchestrator,
    concurrency: usize,
    poll_interval: Duration,
    stale_after: Duration,
    handle: WorkerHandle,
}

impl WorkerPool {
    pub fn new(orchestrator: Orchestrator, config: &WorkerConfig) -> Self {
        Self {
            orchestrator,
            concurrency: config.concurrency.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            stale_after: Duration::from_secs(config.stale_after_seconds),
            handle: WorkerHandle::new(),
        }
    }

    /// Use an existing handle, so an uploader in the same process can wake
    /// the workers.
    pub fn with_handle(mut self, handle: WorkerHandle) -> Self {
        self.handle = handle;
        self
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Settle jobs a dead worker left in `processing`.
    ///
    /// Only jobs claimed longer than `stale_after_seconds` ago count; younger
    /// ones may belong to another live worker. A file whose run had started
    /// is failed, one that was never claimed is queued again.
    pub fn recover_interrupted(&self) -> PipelineResult<usize> {
        let db = self.orchestrator.database();
        let cutoff = chrono::Duration::from_std(self.stale_after)
            .ok()
            .and_then(|lease| Utc::now().checked_sub_signed(lease));
        // A lease too long to represent never expires
        let Some(cutoff) = cutoff else {
            return Ok(0);
        };

        let stale = db.fail_stale_jobs("worker stopped before the job finished", cutoff)?;

        for source_id in &stale {
            let file = match db.get_source_file(source_id) {
                Ok(file) => file,
                Err(DbError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            match file.status {
                FileStatus::Pending => {
                    info!("Re-queueing {}; its job stopped before processing began", file.name);
                    match db.enqueue(&QueueItem::new(source_id)) {
                        Ok(()) | Err(DbError::AlreadyQueued(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                FileStatus::Processing => {
                    warn!("Failing interrupted source file {}", file.name);
                    self.orchestrator
                        .abandon(source_id, "processing was interrupted")?;
                }
                FileStatus::Completed | FileStatus::Failed => {}
            }
        }

        Ok(stale.len())
    }

    /// Run until [`WorkerHandle::shutdown`] is called.
    pub async fn run(&self) -> PipelineResult<()> {
        let recovered = self.recover_interrupted()?;
        if recovered > 0 {
            info!("Recovered {} interrupted jobs", recovered);
        }

        info!("Starting {} workers", self.concurrency);

        let mut workers = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency {
            let pool = self.clone();
            workers.push(tokio::spawn(async move { pool.worker_loop(worker_id).await }));
        }

        for worker in workers {
            if let Err(e) = worker.await {
                error!("Worker task ended abnormally: {}", e);
            }
        }

        info!("All workers stopped");
        Ok(())
    }

    /// Process queued jobs until the queue is empty. Returns the reports of
    /// the files that were processed.
    pub async fn drain(&self) -> PipelineResult<Vec<ProcessReport>> {
        let mut reports = Vec::new();
        while let Some(job) = self.orchestrator.database().dequeue()? {
            if let Some(report) = self.run_job(job).await? {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    /// Process one file right away, settling its queued job if it has one.
    pub async fn process_now(&self, source_id: &str) -> PipelineResult<ProcessReport> {
        match self.orchestrator.database().dequeue_source(source_id)? {
            Some(job) => {
                let job_id = job.id.clone();
                match self.run_job(job).await? {
                    Some(report) => Ok(report),
                    None => {
                        let settled = self.orchestrator.database().get_queue_item(&job_id)?;
                        Err(PipelineError::Job(
                            settled.error.unwrap_or_else(|| "job failed".to_string()),
                        ))
                    }
                }
            }
            None => self.orchestrator.process(source_id).await,
        }
    }

    async fn worker_loop(&self, worker_id: usize) {
        debug!("Worker {} started", worker_id);

        while !self.handle.is_shutdown() {
            let job = match self.orchestrator.database().dequeue() {
                Ok(job) => job,
                Err(e) => {
                    error!("Worker {} could not read the queue: {}", worker_id, e);
                    None
                }
            };

            match job {
                Some(job) => {
                    debug!("Worker {} took job {}", worker_id, job.id);
                    if let Err(e) = self.run_job(job).await {
                        error!("Worker {} job bookkeeping failed: {}", worker_id, e);
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.handle.wake.notified() => {}
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        debug!("Worker {} stopped", worker_id);
    }

    /// Run one claimed job and settle it in the queue.
    ///
    /// The orchestrator runs in its own task so a panic fails the file and
    /// the job instead of taking the worker down.
    async fn run_job(&self, job: QueueItem) -> PipelineResult<Option<ProcessReport>> {
        let db = self.orchestrator.database().clone();
        let orchestrator = self.orchestrator.clone();
        let source_id = job.source_id.clone();

        let joined = tokio::spawn(async move { orchestrator.process(&source_id).await }).await;

        match joined {
            Ok(Ok(report)) => {
                match report.status {
                    FileStatus::Completed => db.mark_done(&job.id)?,
                    _ => db.mark_failed(
                        &job.id,
                        report.error.as_deref().unwrap_or("processing failed"),
                    )?,
                }
                Ok(Some(report))
            }
            Ok(Err(e)) => {
                warn!("Job {} for {} failed: {}", job.id, job.source_id, e);
                if !matches!(e, PipelineError::NotClaimable { .. }) {
                    self.orchestrator.abandon(&job.source_id, &e.to_string())?;
                }
                db.mark_failed(&job.id, &e.to_string())?;
                Ok(None)
            }
            Err(join_error) => {
                let reason = if join_error.is_panic() {
                    "processing panicked"
                } else {
                    "processing was cancelled"
                };
                error!("Job {} for {}: {}", job.id, job.source_id, reason);
                self.orchestrator.abandon(&job.source_id, reason)?;
                db.mark_failed(&job.id, reason)?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::derive::Deriver;
    use crate::selector::ExtractionSelector;
    use kiln_config::{DerivationConfig, ExtractionConfig};
    use kiln_core::{FileKind, QueueStatus, SourceFile};
    use kiln_db::Database;
    use kiln_llm::testing::ScriptedGenerator;

    fn pool(db: &Database, blobs: &MemoryBlobStore, generator: ScriptedGenerator) -> WorkerPool {
        leased_pool(db, blobs, generator, 3600)
    }

    fn leased_pool(
        db: &Database,
        blobs: &MemoryBlobStore,
        generator: ScriptedGenerator,
        stale_after_seconds: u64,
    ) -> WorkerPool {
        let llm: Arc<dyn kiln_llm::Generator> = Arc::new(generator);
        let selector = ExtractionSelector::new(&ExtractionConfig::default(), llm.clone(), None);
        let deriver = Deriver::new(llm, DerivationConfig::default());
        let orchestrator = Orchestrator::new(db.clone(), Arc::new(blobs.clone()), selector, deriver);
        WorkerPool::new(
            orchestrator,
            &WorkerConfig {
                concurrency: 2,
                poll_interval_ms: 10,
                stale_after_seconds,
            },
        )
    }

    fn script() -> ScriptedGenerator {
        ScriptedGenerator::new()
            .with_reply(Some("document_summary"), r#"{"summary": "Notes."}"#)
            .with_reply(Some("keyword_extraction"), r#"{"keywords": ["notes"]}"#)
            .with_reply(Some("text_segmentation"), r#"{"segments": ["one", "two"]}"#)
            .with_reply(Some("qa_generation"), r#"{"qaPairs": []}"#)
    }

    fn enqueue_text(db: &Database, blobs: &MemoryBlobStore, name: &str, body: &str) -> SourceFile {
        let url = blobs.insert(name, body.as_bytes().to_vec());
        let file = SourceFile::new(name, FileKind::Document, url, "rio").with_mime_type("text/plain");
        db.create_source_file(&file).unwrap();
        db.enqueue(&QueueItem::new(&file.id)).unwrap();
        file
    }

    #[tokio::test]
    async fn test_drain_settles_jobs() {
        let db = Database::open_in_memory().unwrap();
        let blobs = MemoryBlobStore::new();
        let pool = pool(&db, &blobs, script());

        let good = enqueue_text(&db, &blobs, "good.txt", &"plenty of words ".repeat(20));
        let short = enqueue_text(&db, &blobs, "short.txt", "tiny");

        let reports = pool.drain().await.unwrap();
        assert_eq!(reports.len(), 2);

        assert_eq!(db.get_source_file(&good.id).unwrap().status, FileStatus::Completed);
        assert_eq!(db.get_source_file(&short.id).unwrap().status, FileStatus::Failed);

        let counts = db.queue_counts().unwrap();
        assert_eq!((counts.done, counts.failed, counts.pending), (1, 1, 0));

        let failed = db.list_queue(Some(QueueStatus::Failed)).unwrap();
        // The short text went on to OCR, which had nothing scripted
        assert!(failed[0].error.as_deref().unwrap().contains("llm-ocr"));
    }

    #[tokio::test]
    async fn test_process_now_settles_the_queued_job() {
        let db = Database::open_in_memory().unwrap();
        let blobs = MemoryBlobStore::new();
        let pool = pool(&db, &blobs, script());

        let file = enqueue_text(&db, &blobs, "inline.txt", &"inline content ".repeat(20));
        let report = pool.process_now(&file.id).await.unwrap();

        assert_eq!(report.status, FileStatus::Completed);
        assert!(!db.is_queued(&file.id).unwrap());
        assert_eq!(db.queue_counts().unwrap().done, 1);

        let again = pool.process_now(&file.id).await;
        assert!(matches!(again, Err(PipelineError::NotClaimable { .. })));
    }

    #[tokio::test]
    async fn test_recover_interrupted_jobs() {
        let db = Database::open_in_memory().unwrap();
        let blobs = MemoryBlobStore::new();
        let pool = leased_pool(&db, &blobs, script(), 0);

        let file = enqueue_text(&db, &blobs, "stuck.txt", "body");
        db.dequeue().unwrap().unwrap();
        assert!(db.claim_source_file(&file.id).unwrap());

        assert_eq!(pool.recover_interrupted().unwrap(), 1);
        assert_eq!(db.get_source_file(&file.id).unwrap().status, FileStatus::Failed);
        assert_eq!(db.queue_counts().unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_second_pool_leaves_live_jobs_alone() {
        let db = Database::open_in_memory().unwrap();
        let blobs = MemoryBlobStore::new();
        // Another worker is mid-run on this file
        let file = enqueue_text(&db, &blobs, "busy.txt", &"long running body ".repeat(20));
        let job = db.dequeue().unwrap().unwrap();
        assert!(db.claim_source_file(&file.id).unwrap());

        let starting = pool(&db, &blobs, script());
        assert_eq!(starting.recover_interrupted().unwrap(), 0);
        assert_eq!(db.get_source_file(&file.id).unwrap().status, FileStatus::Processing);
        assert_eq!(db.get_queue_item(&job.id).unwrap().status, QueueStatus::Processing);

        // The running worker can still settle it
        db.finish_source_file(&file.id, FileStatus::Completed).unwrap();
        db.mark_done(&job.id).unwrap();
        assert_eq!(db.queue_counts().unwrap().done, 1);
    }

    #[tokio::test]
    async fn test_recovery_requeues_unclaimed_files() {
        let db = Database::open_in_memory().unwrap();
        let blobs = MemoryBlobStore::new();
        let pool = leased_pool(&db, &blobs, script(), 0);

        // Dequeued, but the worker died before claiming the file
        let file = enqueue_text(&db, &blobs, "orphan.txt", &"orphaned content ".repeat(20));
        db.dequeue().unwrap().unwrap();

        assert_eq!(pool.recover_interrupted().unwrap(), 1);
        assert_eq!(db.get_source_file(&file.id).unwrap().status, FileStatus::Pending);
        assert!(db.is_queued(&file.id).unwrap());

        let reports = pool.drain().await.unwrap();
        assert_eq!(reports[0].status, FileStatus::Completed);
    }

    #[tokio::test]
    async fn test_run_processes_until_shutdown() {
        let db = Database::open_in_memory().unwrap();
        let blobs = MemoryBlobStore::new();
        let pool = pool(&db, &blobs, script());
        let handle = pool.handle();

        let file = enqueue_text(&db, &blobs, "live.txt", &"streamed content ".repeat(20));

        let runner = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.run().await })
        };
        handle.notify();

        for _ in 0..200 {
            if db.get_source_file(&file.id).unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        handle.shutdown();
        runner.await.unwrap().unwrap();

        assert_eq!(db.get_source_file(&file.id).unwrap().status, FileStatus::Completed);
        assert_eq!(db.queue_counts().unwrap().done, 1);
    }
}
