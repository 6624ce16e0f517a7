//! Scripted generator for tests that must not touch the network.

use crate::error::{LlmError, LlmResult};
use crate::generator::Generator;
use crate::types::{GenerationRequest, GenerationResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Key used for requests that carry no response schema.
pub const FREE_TEXT: &str = "<free-text>";

#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Failure(String),
}

/// A [`Generator`] that answers from a script keyed by response-schema name.
///
/// Each key holds a queue of replies; the last reply for a key repeats once
/// the queue is drained. Unscripted keys fail with an API error.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    script: Arc<Mutex<HashMap<String, Vec<Scripted>>>>,
    calls: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for requests with the given schema (`None` for free text).
    pub fn with_reply(self, schema: Option<&str>, content: impl Into<String>) -> Self {
        self.push(schema, Scripted::Reply(content.into()));
        self
    }

    /// Queue a failure for requests with the given schema.
    pub fn with_failure(self, schema: Option<&str>, message: impl Into<String>) -> Self {
        self.push(schema, Scripted::Failure(message.into()));
        self
    }

    /// All requests received so far.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of requests received with the given schema.
    pub fn call_count(&self, schema: Option<&str>) -> usize {
        self.calls()
            .iter()
            .filter(|r| r.schema_name() == schema)
            .count()
    }

    fn push(&self, schema: Option<&str>, entry: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script
                .entry(schema.unwrap_or(FREE_TEXT).to_string())
                .or_default()
                .push(entry);
        }
    }

    fn next(&self, key: &str) -> Option<Scripted> {
        let mut script = self.script.lock().ok()?;
        let queue = script.get_mut(key)?;
        match queue.len() {
            0 => None,
            1 => queue.first().cloned(),
            _ => Some(queue.remove(0)),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn invoke(&self, request: GenerationRequest) -> LlmResult<GenerationResponse> {
        let key = request.schema_name().unwrap_or(FREE_TEXT).to_string();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request);
        }

        match self.next(&key) {
            Some(Scripted::Reply(content)) => Ok(GenerationResponse::new(content)),
            Some(Scripted::Failure(message)) => Err(LlmError::ApiError {
                status: 500,
                message,
            }),
            None => Err(LlmError::ApiError {
                status: 501,
                message: format!("no scripted reply for {}", key),
            }),
        }
    }
}
