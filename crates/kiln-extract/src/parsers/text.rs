//! Plain text document parser.

use super::{DocumentParser, ParsedDocument};
use crate::error::{ExtractError, ExtractResult};
use crate::outcome::MethodTag;

/// Parser for UTF-8 text files, including source code and data formats.
pub struct TextParser;

impl TextParser {
    pub fn new() -> Self {
        Self
    }

    /// Detect programming language from extension.
    fn detect_language(extension: &str) -> Option<&'static str> {
        match extension.to_lowercase().as_str() {
            "rs" => Some("rust"),
            "py" => Some("python"),
            "js" | "jsx" => Some("javascript"),
            "ts" | "tsx" => Some("typescript"),
            "go" => Some("go"),
            "c" | "h" => Some("c"),
            "cpp" | "hpp" => Some("cpp"),
            "java" => Some("java"),
            "rb" => Some("ruby"),
            "sh" | "bash" => Some("shell"),
            "sql" => Some("sql"),
            "json" => Some("json"),
            "yaml" | "yml" => Some("yaml"),
            "toml" => Some("toml"),
            "html" | "htm" => Some("html"),
            "csv" => Some("csv"),
            _ => None,
        }
    }
}

impl Default for TextParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentParser for TextParser {
    fn parse(&self, bytes: &[u8], filename: &str) -> ExtractResult<ParsedDocument> {
        let content = std::str::from_utf8(bytes).map_err(|e| ExtractError::Parse {
            format: "text".to_string(),
            message: format!("{} is not valid UTF-8: {}", filename, e),
        })?;
        // Strip a UTF-8 byte order mark
        let content = content.trim_start_matches('\u{feff}');

        let extension = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        let mut metadata = serde_json::json!({
            "format": "text",
            "lines": content.lines().count(),
        });
        if let Some(lang) = Self::detect_language(extension) {
            metadata["format"] = serde_json::json!("code");
            metadata["language"] = serde_json::json!(lang);
        }

        Ok(ParsedDocument::new(content).with_metadata(metadata))
    }

    fn method(&self) -> MethodTag {
        MethodTag::PlainText
    }

    fn extensions(&self) -> &[&str] {
        &[
            "txt", "text", "log", "csv", "tsv", "rst", "org", // Plain text
            "rs", "py", "js", "ts", "jsx", "tsx", "go", "c", "cpp", "h", "hpp", // Code
            "java", "rb", "sh", "bash", "sql", "json", "yaml", "yml", "toml", "html", "htm",
        ]
    }

    fn supports_media_type(&self, media_type: &str) -> bool {
        media_type.to_ascii_lowercase().starts_with("text/")
    }
}
