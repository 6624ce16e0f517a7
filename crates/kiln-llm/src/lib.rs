//! Kiln LLM - the generation capability behind OCR, transcription and
//! derivation.
//!
//! This crate provides the [`Generator`] trait, the message types it speaks,
//! and [`ChatClient`], an async client for OpenAI-compatible
//! chat-completion servers (including a local Ollama).

mod client;
mod error;
mod generator;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod types;

pub use client::ChatClient;
pub use error::{LlmError, LlmResult};
pub use generator::Generator;
pub use types::*;
