//! Kiln Pipeline - turns uploaded files into knowledge items and Q&A pairs.
//!
//! This crate provides:
//! - Upload intake and blob storage
//! - Extraction strategy selection with an ordered fallback chain
//! - Derivation stages (summary, keywords, segmentation, Q&A)
//! - Per-stage task tracking
//! - The per-file orchestrator and the queue workers that drive it

mod blob;
mod derive;
mod error;
mod orchestrator;
mod selector;
mod tracker;
mod upload;
mod worker;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use derive::{truncate_chars, Deriver, Keywords, QaDraft, Segments, Summary};
pub use error::{DeriveError, DeriveResult, PipelineError, PipelineResult};
pub use orchestrator::{Orchestrator, ProcessReport};
pub use selector::{ExtractionPlan, ExtractionSelector, PlanStage, NO_URL_FOR_OCR};
pub use tracker::TaskTracker;
pub use upload::{UploadOptions, Uploader};
pub use worker::{WorkerHandle, WorkerPool};
