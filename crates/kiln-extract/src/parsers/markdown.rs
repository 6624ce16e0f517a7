//! Markdown document parser.

use super::{DocumentParser, ParsedDocument};
use crate::error::{ExtractError, ExtractResult};
use crate::outcome::MethodTag;
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag};

/// Renders Markdown to plain text, keeping headings, list markers and code.
pub struct MarkdownParser;

impl MarkdownParser {
    pub fn new() -> Self {
        Self
    }

    /// Returns the plain text and the first H1, if any.
    fn render(markdown: &str) -> (String, Option<String>) {
        let mut text = String::new();
        let mut title: Option<String> = None;
        let mut heading: Option<(HeadingLevel, String)> = None;

        for event in Parser::new(markdown) {
            match event {
                Event::Start(Tag::Heading(level, _, _)) => {
                    heading = Some((level, String::new()));
                }
                Event::End(Tag::Heading(_, _, _)) => {
                    if let Some((level, current)) = heading.take() {
                        let current = current.trim();
                        if level == HeadingLevel::H1 && title.is_none() {
                            title = Some(current.to_string());
                        }
                        text.push_str(current);
                        text.push_str("\n\n");
                    }
                }
                Event::Start(Tag::CodeBlock(_)) => text.push('\n'),
                Event::End(Tag::CodeBlock(_)) => text.push('\n'),
                Event::End(Tag::Paragraph) => text.push_str("\n\n"),
                Event::End(Tag::List(_)) => text.push('\n'),
                Event::Start(Tag::Item) => text.push_str("- "),
                Event::End(Tag::Item) => text.push('\n'),
                Event::Text(t) | Event::Code(t) => match heading.as_mut() {
                    Some((_, current)) => current.push_str(&t),
                    None => text.push_str(&t),
                },
                Event::SoftBreak | Event::HardBreak => text.push('\n'),
                _ => {}
            }
        }

        (text.trim().to_string(), title)
    }
}

impl Default for MarkdownParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentParser for MarkdownParser {
    fn parse(&self, bytes: &[u8], filename: &str) -> ExtractResult<ParsedDocument> {
        let source = std::str::from_utf8(bytes).map_err(|e| ExtractError::Parse {
            format: "markdown".to_string(),
            message: format!("{} is not valid UTF-8: {}", filename, e),
        })?;

        let (text, title) = Self::render(source);
        let metadata = serde_json::json!({
            "format": "markdown",
            "original_length": source.chars().count(),
        });

        let mut doc = ParsedDocument::new(text).with_metadata(metadata);
        if let Some(t) = title {
            doc = doc.with_title(t);
        }
        Ok(doc)
    }

    fn method(&self) -> MethodTag {
        MethodTag::Markdown
    }

    fn extensions(&self) -> &[&str] {
        &["md", "markdown", "mdown", "mkd"]
    }

    fn supports_media_type(&self, media_type: &str) -> bool {
        media_type.eq_ignore_ascii_case("text/markdown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_markdown() {
        let source = r#"# Pump Manual

Check the **seal** before every run.

## Maintenance

- Replace filter
- Inspect `valve_a`

```
torque = 12
```
"#;
        let doc = MarkdownParser::new().parse(source.as_bytes(), "pump.md").unwrap();

        assert_eq!(doc.title.as_deref(), Some("Pump Manual"));
        assert!(doc.content.contains("Check the seal before every run."));
        assert!(doc.content.contains("Maintenance"));
        assert!(doc.content.contains("- Replace filter"));
        assert!(doc.content.contains("valve_a"));
        assert!(doc.content.contains("torque = 12"));
        assert!(!doc.content.contains("**"));
    }

    #[test]
    fn test_no_title() {
        let doc = MarkdownParser::new()
            .parse(b"Just a paragraph.\n\n## Sub only", "n.md")
            .unwrap();
        assert!(doc.title.is_none());
    }
}
