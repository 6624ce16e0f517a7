//! Configuration structures and loading.

use crate::error::{ConfigError, ConfigResult};
use crate::paths::AppPaths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub derivation: DerivationConfig,

    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> ConfigResult<Self> {
        let paths = AppPaths::new().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&paths.config_file)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Create a default config file with comments.
    pub fn create_default_file(path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::default_config_string())?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.derivation.keyword_min > self.derivation.keyword_max {
            return Err(ConfigError::Invalid(format!(
                "derivation.keyword_min ({}) exceeds keyword_max ({})",
                self.derivation.keyword_min, self.derivation.keyword_max
            )));
        }
        if self.derivation.input_char_limit == 0 {
            return Err(ConfigError::Invalid(
                "derivation.input_char_limit must be positive".to_string(),
            ));
        }
        if self.worker.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "worker.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve application paths, honoring `general.data_dir` and
    /// `storage.blob_dir` overrides.
    pub fn resolve_paths(&self) -> ConfigResult<AppPaths> {
        let mut paths = AppPaths::new().ok_or(ConfigError::NoConfigDir)?;
        if let Some(dir) = &self.general.data_dir {
            paths = paths.relocate_data(&expand_path(dir)?);
        }
        if let Some(dir) = &self.storage.blob_dir {
            paths.blob_dir = expand_path(dir)?;
        }
        Ok(paths)
    }

    /// Generate a default config file with helpful comments.
    pub fn default_config_string() -> String {
        r#"# Kiln Configuration
# Ingestion pipeline for the knowledge base

[general]
# Data directory for the database and stored blobs
# data_dir = "~/.local/share/kiln"

[llm]
# OpenAI-compatible server (a local Ollama works)
host = "http://localhost:11434"

# Multimodal model used for OCR, transcription and derivation
model = "qwen2.5vl:7b"

# Bearer token, if the server needs one
# api_key = ""

# Request timeout in seconds
timeout_seconds = 120

[storage]
# Where uploaded blobs are written (defaults to <data_dir>/blobs)
# blob_dir = "~/kiln-blobs"

# When set, blob URLs are <public_base_url>/<key> instead of file:// URLs
# public_base_url = "https://cdn.example.com"

# Largest blob fetched over HTTP
max_fetch_bytes = 536870912

# Without a public URL, blobs up to this size are sent to OCR and
# transcription inline as data: URLs (0 disables)
inline_max_bytes = 20971520

[extraction]
# Structured output shorter than this falls through to OCR
min_text_chars = 100

# Advanced layout conversion (external `mineru` command)
layout_enabled = true
layout_command = "mineru"
layout_backend = "pipeline"
layout_method = "auto"
layout_lang = "ch"
layout_timeout_seconds = 300
probe_timeout_seconds = 5

# Only PDFs at most this size with a matching name use layout conversion
layout_max_bytes = 52428800
layout_keywords = [
    "paper", "thesis", "research", "journal", "conference",
    "论文", "研究", "学术", "期刊", "会议",
    "arxiv", "ieee", "acm", "springer",
    "manual", "guide", "documentation", "spec", "technical",
    "手册", "指南", "文档", "规范", "技术",
]

[derivation]
# Characters of extracted text sent to each derivation stage
input_char_limit = 8000
summary_max_chars = 200
qa_pair_count = 5
keyword_min = 5
keyword_max = 10

[worker]
# Files processed concurrently
concurrency = 2

# Queue poll interval when idle
poll_interval_ms = 500

# A processing job older than this is treated as abandoned at worker start
stale_after_seconds = 3600
"#
        .to_string()
    }
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(raw: &str) -> ConfigResult<PathBuf> {
    shellexpand::full(raw)
        .map(|expanded| PathBuf::from(expanded.as_ref()))
        .map_err(|e| ConfigError::PathExpansion {
            path: raw.to_string(),
            message: e.to_string(),
        })
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub data_dir: Option<String>,
}

/// Generation capability settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub host: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "qwen2.5vl:7b".to_string(),
            api_key: None,
            timeout_seconds: 120,
        }
    }
}

/// Blob storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub blob_dir: Option<String>,
    pub public_base_url: Option<String>,
    pub max_fetch_bytes: u64,
    pub inline_max_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_dir: None,
            public_base_url: None,
            max_fetch_bytes: 512 * 1024 * 1024,
            inline_max_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Keywords that mark a PDF as academic or technical.
pub fn default_layout_keywords() -> Vec<String> {
    [
        // academic
        "paper", "thesis", "research", "journal", "conference", "论文", "研究", "学术", "期刊",
        "会议", "arxiv", "ieee", "acm", "springer",
        // technical
        "manual", "guide", "documentation", "spec", "technical", "手册", "指南", "文档",
        "规范", "技术",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Extraction strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub min_text_chars: usize,
    pub layout_enabled: bool,
    pub layout_command: String,
    pub layout_backend: String,
    pub layout_method: Option<String>,
    pub layout_lang: Option<String>,
    pub layout_timeout_seconds: u64,
    pub probe_timeout_seconds: u64,
    pub layout_max_bytes: u64,
    pub layout_keywords: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 100,
            layout_enabled: true,
            layout_command: "mineru".to_string(),
            layout_backend: "pipeline".to_string(),
            layout_method: Some("auto".to_string()),
            layout_lang: Some("ch".to_string()),
            layout_timeout_seconds: 300,
            probe_timeout_seconds: 5,
            layout_max_bytes: 50 * 1024 * 1024,
            layout_keywords: default_layout_keywords(),
        }
    }
}

/// Derivation stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivationConfig {
    pub input_char_limit: usize,
    pub summary_max_chars: usize,
    pub qa_pair_count: usize,
    pub keyword_min: usize,
    pub keyword_max: usize,
}

impl Default for DerivationConfig {
    fn default() -> Self {
        Self {
            input_char_limit: 8000,
            summary_max_chars: 200,
            qa_pair_count: 5,
            keyword_min: 5,
            keyword_max: 10,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub stale_after_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval_ms: 500,
            stale_after_seconds: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.llm.host, "http://localhost:11434");
        assert_eq!(config.extraction.min_text_chars, 100);
        assert_eq!(config.derivation.input_char_limit, 8000);
        assert!(config.extraction.layout_keywords.contains(&"论文".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_string_matches_defaults() {
        let parsed: Config = toml::from_str(&Config::default_config_string()).unwrap();
        let defaults = Config::default();

        assert_eq!(parsed.llm.model, defaults.llm.model);
        assert_eq!(parsed.storage.max_fetch_bytes, defaults.storage.max_fetch_bytes);
        assert_eq!(parsed.extraction.layout_max_bytes, defaults.extraction.layout_max_bytes);
        assert_eq!(parsed.extraction.layout_keywords, defaults.extraction.layout_keywords);
        assert_eq!(parsed.worker.concurrency, defaults.worker.concurrency);
        assert_eq!(parsed.worker.stale_after_seconds, defaults.worker.stale_after_seconds);
        assert_eq!(parsed.storage.inline_max_bytes, defaults.storage.inline_max_bytes);
    }

    #[test]
    fn test_load_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
            [llm]
            model = "llava"

            [derivation]
            qa_pair_count = 3
            "#
        )
        .unwrap();

        let config = Config::load_from(temp_file.path()).unwrap();

        assert_eq!(config.llm.model, "llava");
        assert_eq!(config.derivation.qa_pair_count, 3);
        // Defaults should still work
        assert_eq!(config.llm.host, "http://localhost:11434");
        assert_eq!(config.derivation.keyword_max, 10);
    }

    #[test]
    fn test_load_rejects_inverted_keyword_bounds() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
            [derivation]
            keyword_min = 12
            keyword_max = 4
            "#
        )
        .unwrap();

        let result = Config::load_from(temp_file.path());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load_from(Path::new("/definitely/not/here.toml")).unwrap();
        assert_eq!(config.worker.poll_interval_ms, 500);
    }
}
