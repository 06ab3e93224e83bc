//! Structured document formats for `deep` merges.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::core::errors::StowageError;
use crate::flow::tree;

/// A structured file format, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocFormat {
    Json,
    Toml,
}

impl DocFormat {
    /// Pick the format for a path.
    pub fn from_path(path: &Path) -> Result<Self, StowageError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") | Some("jsonc") => Ok(DocFormat::Json),
            Some("toml") => Ok(DocFormat::Toml),
            _ => Err(StowageError::validation(
                format!("deep merge target `{}`", path.display()),
                "only .json and .toml files can be deep-merged",
            )),
        }
    }

    /// Parse text into a tree. Blank text is an empty document.
    pub fn parse(&self, text: &str) -> Result<Value> {
        if text.trim().is_empty() {
            return Ok(tree::empty());
        }
        match self {
            DocFormat::Json => serde_json::from_str(text).context("invalid JSON document"),
            DocFormat::Toml => {
                let value: toml::Value = toml::from_str(text).context("invalid TOML document")?;
                serde_json::to_value(value).context("failed to convert TOML document")
            }
        }
    }

    /// Render a tree in this format, with a trailing newline.
    pub fn render(&self, value: &Value) -> Result<String> {
        let mut text = match self {
            DocFormat::Json => {
                serde_json::to_string_pretty(value).context("failed to render JSON document")?
            }
            DocFormat::Toml => {
                toml::to_string_pretty(value).context("failed to render TOML document")?
            }
        };
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_path() {
        assert_eq!(DocFormat::from_path(Path::new(".mcp.json")).unwrap(), DocFormat::Json);
        assert_eq!(
            DocFormat::from_path(Path::new(".codex/config.toml")).unwrap(),
            DocFormat::Toml
        );
        assert!(DocFormat::from_path(Path::new("CLAUDE.md")).is_err());
    }

    #[test]
    fn test_toml_through_tree() {
        let doc = DocFormat::Toml
            .parse("[mcp_servers.fs]\ncommand = \"npx\"\nargs = [\"-y\"]\n")
            .unwrap();
        assert_eq!(doc, json!({ "mcp_servers": { "fs": { "command": "npx", "args": ["-y"] } } }));

        let text = DocFormat::Toml.render(&doc).unwrap();
        assert_eq!(DocFormat::Toml.parse(&text).unwrap(), doc);
    }

    #[test]
    fn test_blank_is_empty() {
        assert_eq!(DocFormat::Json.parse("  \n").unwrap(), json!({}));
        assert!(DocFormat::Json.parse("{ nope").is_err());
    }
}
