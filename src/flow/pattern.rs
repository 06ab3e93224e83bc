//! Flow path patterns.
//!
//! Patterns are `/`-separated relative paths where `*` matches within one
//! segment and `**` matches across segments. Wildcards capture what they
//! matched, in order, so a target pattern can reuse them:
//!
//! ```text
//! rules/**/*.md  ->  {rootDir}/rules/**/*.mdc
//! rules/team/style.md  ->  .cursor/rules/team/style.mdc
//! ```

use regex::Regex;

use crate::core::errors::StowageError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    /// `*`
    Star,
    /// `**/`: zero or more whole directories
    DeepDir,
    /// `**` not followed by `/`
    Deep,
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '*' {
            literal.push(c);
            continue;
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(std::mem::take(&mut literal)));
        }
        if chars.peek() == Some(&'*') {
            chars.next();
            if chars.peek() == Some(&'/') {
                chars.next();
                tokens.push(Token::DeepDir);
            } else {
                tokens.push(Token::Deep);
            }
        } else {
            tokens.push(Token::Star);
        }
    }
    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    tokens
}

fn wildcard_count(tokens: &[Token]) -> usize {
    tokens
        .iter()
        .filter(|t| !matches!(t, Token::Literal(_)))
        .count()
}

fn invalid(pattern: &str, message: impl Into<String>) -> StowageError {
    StowageError::validation(format!("flow pattern `{}`", pattern), message)
}

fn validate(pattern: &str) -> Result<(), StowageError> {
    if pattern.trim().is_empty() {
        return Err(invalid(pattern, "pattern is empty"));
    }
    if pattern.starts_with('/') || pattern.contains('\\') {
        return Err(invalid(pattern, "pattern must be a relative `/`-separated path"));
    }
    if pattern.contains("***") {
        return Err(invalid(pattern, "ambiguous wildcard `***`"));
    }
    if pattern.split('/').any(|seg| seg == "..") {
        return Err(invalid(pattern, "pattern must not contain `..`"));
    }
    Ok(())
}

/// A compiled source pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    regex: Regex,
    wildcards: usize,
}

impl PathPattern {
    /// Compile a pattern (variables must already be substituted).
    pub fn compile(pattern: &str) -> Result<Self, StowageError> {
        validate(pattern)?;
        let tokens = tokenize(pattern);

        let mut source = String::from("^");
        for token in &tokens {
            match token {
                Token::Literal(text) => source.push_str(&regex::escape(text)),
                Token::Star => source.push_str("([^/]*)"),
                Token::DeepDir => source.push_str("((?:[^/]+/)*)"),
                Token::Deep => source.push_str("(.*)"),
            }
        }
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| invalid(pattern, e.to_string()))?;
        Ok(PathPattern {
            raw: pattern.to_string(),
            regex,
            wildcards: wildcard_count(&tokens),
        })
    }

    /// Match a relative path, returning the wildcard captures in order.
    pub fn captures(&self, path: &str) -> Option<Vec<String>> {
        let caps = self.regex.captures(path)?;
        Some(
            caps.iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        )
    }

    pub fn wildcards(&self) -> usize {
        self.wildcards
    }

    /// The directory every match lies under (`""` for the root).
    pub fn base_dir(&self) -> &str {
        let literal = match self.raw.find('*') {
            Some(star) => &self.raw[..star],
            None => &self.raw,
        };
        match literal.rfind('/') {
            Some(slash) => &self.raw[..slash],
            None => "",
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Fill a target pattern's wildcards with captures from the source match.
///
/// A target with no wildcards maps every match onto one path (many-to-one,
/// used by merged files). Otherwise it must have exactly as many wildcards
/// as the source pattern.
pub fn render(target: &str, captures: &[String]) -> Result<String, StowageError> {
    validate(target)?;
    let tokens = tokenize(target);
    let count = wildcard_count(&tokens);
    if count != 0 && count != captures.len() {
        return Err(invalid(
            target,
            format!(
                "target has {} wildcard(s) but the source pattern captures {}",
                count,
                captures.len()
            ),
        ));
    }

    let mut captures = captures.iter();
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Literal(text) => out.push_str(&text),
            _ => out.push_str(captures.next().map(String::as_str).unwrap_or_default()),
        }
    }

    let out = out.replace("//", "/");
    if out.is_empty() || out.ends_with('/') {
        return Err(invalid(target, "pattern rendered to an empty file name"));
    }
    Ok(out)
}

/// Values for `{variable}` placeholders in flow patterns.
#[derive(Debug, Clone, Copy)]
pub struct PatternVars<'a> {
    pub root_dir: &'a str,
    pub root_file: Option<&'a str>,
    pub name: &'a str,
    pub version: Option<&'a str>,
    pub priority: i32,
}

impl PatternVars<'_> {
    /// Replace every `{variable}` in `template`.
    pub fn substitute(&self, template: &str) -> Result<String, StowageError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let end = after
                .find('}')
                .ok_or_else(|| invalid(template, "unclosed `{`"))?;
            let value = self.lookup(&after[..end], template)?;
            out.push_str(&value);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn lookup(&self, name: &str, template: &str) -> Result<String, StowageError> {
        match name {
            "rootDir" => Ok(self.root_dir.to_string()),
            "rootFile" => self
                .root_file
                .map(str::to_string)
                .ok_or_else(|| invalid(template, "platform has no root file")),
            "name" => Ok(self.name.to_string()),
            "version" => Ok(self.version.unwrap_or("0.0.0").to_string()),
            "priority" => Ok(self.priority.to_string()),
            other => Err(invalid(template, format!("unknown variable `{{{}}}`", other))),
        }
    }
}
