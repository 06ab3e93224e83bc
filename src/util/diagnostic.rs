//! User-friendly diagnostic messages.
//!
//! Every error shown to the user should say what went wrong, where it was
//! declared, and what to try next.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

/// Common suggestion messages for consistent error handling.
pub mod suggestions {
    /// Suggestion when no manifest file is found.
    pub const NO_MANIFEST: &str =
        "help: Run `stowage install <package>` to create Stowage.toml with a first dependency";

    /// Suggestion when a declaration is malformed or points nowhere.
    pub const CHECK_DECLARATION: &str =
        "help: Check the dependency entry in Stowage.toml (name, path, url, ref)";

    /// Suggestion when a package is not installed.
    pub const PACKAGE_NOT_INSTALLED: &str = "help: Run `stowage tree` to see all dependencies";

    /// Suggestion when a file was relocated.
    pub const RELOCATED: &str =
        "help: Raise the `priority` of the package whose file should keep the original path";

    /// Suggestion when nothing could be installed.
    pub const INSTALL_FAILED: &str = "help: Run `stowage install --verbose` for more details";
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// A diagnostic message with optional suggestions.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Primary message
    pub message: String,
    /// Severity level
    pub severity: Severity,
    /// Additional context lines
    pub context: Vec<String>,
    /// Suggested fixes
    pub suggestions: Vec<String>,
    /// Related location (file path)
    pub location: Option<PathBuf>,
}

impl Diagnostic {
    fn with_severity(message: impl Into<String>, severity: Severity) -> Self {
        Diagnostic {
            message: message.into(),
            severity,
            context: Vec::new(),
            suggestions: Vec::new(),
            location: None,
        }
    }

    /// Create a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_severity(message, Severity::Error)
    }

    /// Create a new warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::with_severity(message, Severity::Warning)
    }

    /// Create a new note.
    pub fn note(message: impl Into<String>) -> Self {
        Self::with_severity(message, Severity::Note)
    }

    /// Add context to the diagnostic.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    /// Add a suggestion for fixing the issue.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Add a file location.
    pub fn with_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.location = Some(path.into());
        self
    }

    /// Format the diagnostic for terminal output.
    pub fn format(&self, color: bool) -> String {
        let mut output = String::new();

        let severity_str = match (color, self.severity) {
            (true, Severity::Error) => "\x1b[1;31merror\x1b[0m".to_string(),
            (true, Severity::Warning) => "\x1b[1;33mwarning\x1b[0m".to_string(),
            (true, Severity::Note) => "\x1b[1;36mnote\x1b[0m".to_string(),
            (false, severity) => severity.to_string(),
        };

        output.push_str(&format!("{}: {}\n", severity_str, self.message));

        if let Some(ref path) = self.location {
            output.push_str(&format!("  --> {}\n", path.display()));
        }

        for ctx in &self.context {
            output.push_str(&format!("  = {}\n", ctx));
        }

        if !self.suggestions.is_empty() {
            output.push('\n');
            for suggestion in &self.suggestions {
                output.push_str(&format!("{}\n", suggestion));
            }
        }

        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

/// Install produced no files and at least one error.
#[derive(Debug, Error, MietteDiagnostic)]
#[error("installation failed: no files were written ({errors} error(s))")]
#[diagnostic(
    code(stowage::install::failed),
    help("Run `stowage install --verbose` for more details")
)]
pub struct InstallFailedError {
    pub errors: usize,
    pub first: Option<String>,
}

/// A package named on the command line is not installed.
#[derive(Debug, Error, MietteDiagnostic)]
#[error("package `{package}` is not installed in this workspace")]
#[diagnostic(code(stowage::uninstall::not_installed))]
pub struct PackageNotInstalledError {
    pub package: String,
    #[help]
    pub suggestions: Option<String>,
}

/// Print a diagnostic to stderr.
pub fn emit(diagnostic: &Diagnostic, color: bool) {
    eprint!("{}", diagnostic.format(color));
}
