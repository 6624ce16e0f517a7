//! Advanced-layout PDF conversion through an external `mineru` process.

use crate::error::{ExtractError, ExtractResult};
use crate::outcome::{ExtractionInput, ExtractionOutcome, ExtractionStrategy, MethodTag};
use async_trait::async_trait;
use kiln_config::ExtractionConfig;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Markdown (and optional JSON) produced by a layout conversion.
#[derive(Debug, Clone)]
pub struct LayoutOutput {
    pub markdown: String,
    pub json: Option<serde_json::Value>,
    pub elapsed: Duration,
}

/// An external capability that turns a PDF into Markdown.
#[async_trait]
pub trait LayoutConverter: Send + Sync {
    /// Time-bounded liveness probe.
    async fn is_available(&self) -> bool;

    /// Convert one PDF. Temporary files never outlive the call.
    async fn convert(&self, pdf: &[u8], filename: &str) -> ExtractResult<LayoutOutput>;
}

/// Runs `mineru -p <input> -o <output> -b <backend> [-m <method>] [-l <lang>]`.
#[derive(Debug, Clone)]
pub struct MineruConverter {
    command: String,
    backend: String,
    method: Option<String>,
    lang: Option<String>,
    timeout: Duration,
    probe_timeout: Duration,
    scratch_root: Option<PathBuf>,
}

impl MineruConverter {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            command: config.layout_command.clone(),
            backend: config.layout_backend.clone(),
            method: config.layout_method.clone().filter(|m| !m.is_empty()),
            lang: config.layout_lang.clone().filter(|l| !l.is_empty()),
            timeout: Duration::from_secs(config.layout_timeout_seconds),
            probe_timeout: Duration::from_secs(config.probe_timeout_seconds),
            scratch_root: None,
        }
    }

    /// Create scratch directories under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(dir.into());
        self
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-p".into(),
            input.as_os_str().to_owned(),
            "-o".into(),
            output.as_os_str().to_owned(),
            "-b".into(),
            self.backend.clone().into(),
        ];
        if let Some(method) = &self.method {
            args.push("-m".into());
            args.push(method.into());
        }
        if let Some(lang) = &self.lang {
            args.push("-l".into());
            args.push(lang.into());
        }
        args
    }
}

#[async_trait]
impl LayoutConverter for MineruConverter {
    async fn is_available(&self) -> bool {
        if which::which(&self.command).is_err() {
            debug!("{} not found on PATH", self.command);
            return false;
        }

        let probe = Command::new(&self.command)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!("{} probe failed: {}", self.command, e);
                false
            }
            Err(_) => {
                warn!(
                    "{} probe timed out after {:?}",
                    self.command, self.probe_timeout
                );
                false
            }
        }
    }

    async fn convert(&self, pdf: &[u8], filename: &str) -> ExtractResult<LayoutOutput> {
        let started = Instant::now();

        // Input and output share one scratch directory; dropping it removes both
        let mut builder = tempfile::Builder::new();
        builder.prefix("kiln-layout-");
        let scratch = match &self.scratch_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        let input = scratch.path().join("input.pdf");
        let output = scratch.path().join("output");
        tokio::fs::write(&input, pdf).await?;
        tokio::fs::create_dir_all(&output).await?;

        info!("Converting {} with {}", filename, self.command);

        let child = Command::new(&self.command)
            .args(self.args(&input, &output))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ExtractError::ToolNotFound {
                    tool: self.command.clone(),
                },
                _ => ExtractError::Io(e),
            })?;

        // On timeout the child future is dropped and kill_on_drop reaps it
        let result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ExtractError::Timeout {
                tool: self.command.clone(),
                seconds: self.timeout.as_secs(),
            })??;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let stdout = String::from_utf8_lossy(&result.stdout);
            return Err(ExtractError::ProcessFailed {
                code: result.status.code().unwrap_or(-1),
                stderr: if stderr.trim().is_empty() {
                    stdout.trim().to_string()
                } else {
                    stderr.trim().to_string()
                },
            });
        }

        let (markdown_path, json_path) = find_outputs(&output);
        let markdown_path = markdown_path.ok_or_else(|| ExtractError::NoOutput("markdown".to_string()))?;
        let markdown = tokio::fs::read_to_string(&markdown_path).await?;

        let json = match json_path {
            Some(path) => match tokio::fs::read_to_string(&path).await {
                Ok(raw) => serde_json::from_str(&raw)
                    .map_err(|e| warn!("Ignoring unparsable layout JSON {:?}: {}", path, e))
                    .ok(),
                Err(e) => {
                    warn!("Could not read layout JSON {:?}: {}", path, e);
                    None
                }
            },
            None => None,
        };

        let elapsed = started.elapsed();
        debug!("Layout conversion of {} took {:?}", filename, elapsed);

        Ok(LayoutOutput {
            markdown,
            json,
            elapsed,
        })
    }
}

/// First `.md` and first `.json` file under `dir`, searched recursively in
/// path order.
fn find_outputs(dir: &Path) -> (Option<PathBuf>, Option<PathBuf>) {
    let mut markdown = None;
    let mut json = None;

    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("md") if markdown.is_none() => markdown = Some(entry.into_path()),
            Some("json") if json.is_none() => json = Some(entry.into_path()),
            _ => {}
        }
        if markdown.is_some() && json.is_some() {
            break;
        }
    }

    (markdown, json)
}

/// Whether a PDF is worth sending to the layout converter: a `.pdf` name, at
/// most `max_bytes` long, whose lowercased name contains one of `keywords`.
pub fn should_use_layout(filename: &str, size: u64, max_bytes: u64, keywords: &[String]) -> bool {
    let lower = filename.to_lowercase();
    if !lower.ends_with(".pdf") || size > max_bytes {
        return false;
    }
    keywords
        .iter()
        .any(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
}

/// Strategy wrapper around a [`LayoutConverter`].
///
/// Gating and the liveness probe are the selector's concern; this only runs
/// the conversion and reports the outcome.
#[derive(Clone)]
pub struct LayoutStrategy {
    converter: Arc<dyn LayoutConverter>,
}

impl LayoutStrategy {
    pub fn new(converter: Arc<dyn LayoutConverter>) -> Self {
        Self { converter }
    }

    pub async fn is_available(&self) -> bool {
        self.converter.is_available().await
    }
}

#[async_trait]
impl ExtractionStrategy for LayoutStrategy {
    fn method(&self) -> MethodTag {
        MethodTag::Mineru
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> ExtractionOutcome {
        let Some(bytes) = input.bytes else {
            return ExtractionOutcome::failed("no file bytes available", self.method());
        };

        match self.converter.convert(bytes, input.filename).await {
            Ok(output) => {
                let mut details = serde_json::Map::new();
                details.insert(
                    "elapsed_ms".to_string(),
                    (output.elapsed.as_millis() as u64).into(),
                );
                details.insert("layout_json".to_string(), output.json.is_some().into());
                ExtractionOutcome::text(output.markdown, self.method()).with_details(details)
            }
            Err(e) => ExtractionOutcome::failed(e.to_string(), self.method()),
        }
    }
}
