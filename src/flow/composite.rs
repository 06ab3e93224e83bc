//! Composite documents: free text with package-attributed blocks.
//!
//! ```text
//! # Project notes            <- user text, kept as-is
//!
//! <!-- stowage:begin team-rules -->
//! ...content from team-rules...
//! <!-- stowage:end team-rules -->
//! ```

const BEGIN: &str = "<!-- stowage:begin ";
const END: &str = "<!-- stowage:end ";
const CLOSE: &str = " -->";

fn marker_name<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.trim()
        .strip_prefix(prefix)?
        .strip_suffix(CLOSE)
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

/// A parsed composite document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeDoc {
    /// Text outside any block
    pub preamble: String,
    /// `(package, body)` in document order
    pub blocks: Vec<(String, String)>,
}

impl CompositeDoc {
    /// Parse a document. An unterminated block is kept as plain text.
    pub fn parse(text: &str) -> Self {
        let mut preamble: Vec<&str> = Vec::new();
        let mut blocks = Vec::new();
        let mut lines = text.lines();

        while let Some(line) = lines.next() {
            let Some(name) = marker_name(line, BEGIN) else {
                preamble.push(line);
                continue;
            };

            let mut body = Vec::new();
            let mut closed = false;
            for inner in lines.by_ref() {
                if marker_name(inner, END) == Some(name) {
                    closed = true;
                    break;
                }
                body.push(inner);
            }

            if closed {
                blocks.push((name.to_string(), body.join("\n")));
            } else {
                preamble.push(line);
                preamble.extend(body);
            }
        }

        CompositeDoc {
            preamble: preamble.join("\n").trim_end().to_string(),
            blocks,
        }
    }

    pub fn block(&self, package: &str) -> Option<&str> {
        self.blocks
            .iter()
            .find(|(name, _)| name == package)
            .map(|(_, body)| body.as_str())
    }

    /// Drop a package's block; returns whether one was present.
    pub fn remove(&mut self, package: &str) -> bool {
        let before = self.blocks.len();
        self.blocks.retain(|(name, _)| name != package);
        before != self.blocks.len()
    }

    /// Insert or replace a package's block.
    pub fn upsert(&mut self, package: &str, body: &str) {
        let body = body.trim_end().to_string();
        match self.blocks.iter_mut().find(|(name, _)| name == package) {
            Some(existing) => existing.1 = body,
            None => self.blocks.push((package.to_string(), body)),
        }
    }

    /// Reorder blocks with a caller-supplied sort key.
    pub fn sort_blocks_by_key<K: Ord>(&mut self, mut key: impl FnMut(&str) -> K) {
        self.blocks.sort_by_key(|(name, _)| key(name));
    }

    pub fn is_empty(&self) -> bool {
        self.preamble.trim().is_empty() && self.blocks.is_empty()
    }

    /// Render back to text.
    pub fn render(&self) -> String {
        let mut out = self.preamble.trim_end().to_string();
        for (name, body) in &self.blocks {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&format!("{}{}{}\n", BEGIN, name, CLOSE));
            if !body.is_empty() {
                out.push_str(body);
                out.push('\n');
            }
            out.push_str(&format!("{}{}{}", END, name, CLOSE));
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }
}
