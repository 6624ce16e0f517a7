//! Durable per-stage task records.

use crate::error::PipelineResult;
use kiln_core::{ProcessingTask, TaskKind};
use kiln_db::Database;
use tracing::{debug, warn};

/// Creates and updates the [`ProcessingTask`] for each stage attempt.
///
/// The in-memory task mirrors every write, so callers can hand it back for
/// the next update without re-reading the row.
#[derive(Clone)]
pub struct TaskTracker {
    db: Database,
}

impl TaskTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record the start of a stage: a new task in `processing` at 0%.
    pub fn start(
        &self,
        source_id: &str,
        kind: TaskKind,
        created_by: &str,
    ) -> PipelineResult<ProcessingTask> {
        let mut task = ProcessingTask::new(source_id, kind, created_by);
        task.start();
        self.db.create_task(&task)?;
        debug!("Started {} task {} for {}", kind, task.id, source_id);
        Ok(task)
    }

    pub fn advance(&self, task: &mut ProcessingTask, progress: u8) -> PipelineResult<()> {
        self.db.advance_task(&task.id, progress)?;
        task.advance(progress);
        Ok(())
    }

    pub fn complete(
        &self,
        task: &mut ProcessingTask,
        result: Option<serde_json::Value>,
    ) -> PipelineResult<()> {
        self.db.complete_task(&task.id, result.as_ref())?;
        task.complete(result);
        Ok(())
    }

    pub fn fail(&self, task: &mut ProcessingTask, message: &str) -> PipelineResult<()> {
        warn!("{} task {} failed: {}", task.kind, task.id, message);
        self.db.fail_task(&task.id, message)?;
        task.fail(message);
        Ok(())
    }

    /// Fail every task of `source_id` that is still open. Returns how many
    /// were closed.
    pub fn fail_open(&self, source_id: &str, message: &str) -> PipelineResult<usize> {
        let mut closed = 0;
        for task in self.db.list_tasks(Some(source_id))? {
            if !task.status.is_terminal() {
                self.db.fail_task(&task.id, message)?;
                closed += 1;
            }
        }
        Ok(closed)
    }
}
