//! Centralized shell output.
//!
//! The Shell module provides one API for CLI output:
//! - Status messages with consistent formatting
//! - A spinner for long phases (via indicatif)
//! - JSON output mode for machine-readable reports
//!
//! JSON mode is mutually exclusive with human output: status lines are
//! suppressed and only JSON documents reach stdout.

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

/// Shell output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellMode {
    /// Human-readable output
    Human { verbose: bool, color: bool },
    /// Machine-readable JSON output only
    Json,
}

/// Status types for output messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    // Success statuses (green)
    Installed,
    Added,
    Removed,
    Saved,
    Finished,

    // In-progress statuses (cyan)
    Resolving,
    Installing,

    // Warning statuses (yellow)
    Relocated,
    Skipped,
    Warning,

    // Error status (red)
    Error,
}

impl Status {
    fn as_str(&self) -> &'static str {
        match self {
            Status::Installed => "Installed",
            Status::Added => "Added",
            Status::Removed => "Removed",
            Status::Saved => "Saved",
            Status::Finished => "Finished",
            Status::Resolving => "Resolving",
            Status::Installing => "Installing",
            Status::Relocated => "Relocated",
            Status::Skipped => "Skipped",
            Status::Warning => "warning",
            Status::Error => "error",
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            Status::Installed
            | Status::Added
            | Status::Removed
            | Status::Saved
            | Status::Finished => "\x1b[1;32m",
            Status::Resolving | Status::Installing => "\x1b[1;36m",
            Status::Relocated | Status::Skipped | Status::Warning => "\x1b[1;33m",
            Status::Error => "\x1b[1;31m",
        }
    }
}

const STATUS_WIDTH: usize = 12;

/// Central shell for all CLI output.
#[derive(Debug)]
pub struct Shell {
    mode: ShellMode,
}

impl Shell {
    /// Create a new shell with the given mode.
    pub fn new(mode: ShellMode) -> Self {
        Shell { mode }
    }

    /// Create a shell from CLI flags. JSON takes precedence over everything.
    pub fn from_flags(verbose: bool, no_color: bool, json: bool) -> Self {
        let mode = if json {
            ShellMode::Json
        } else {
            ShellMode::Human {
                verbose,
                color: !no_color && io::stderr().is_terminal(),
            }
        };
        Shell::new(mode)
    }

    /// Check if shell is in JSON mode.
    pub fn is_json(&self) -> bool {
        matches!(self.mode, ShellMode::Json)
    }

    /// Check if colors are enabled.
    pub fn use_color(&self) -> bool {
        matches!(self.mode, ShellMode::Human { color: true, .. })
    }

    fn is_verbose(&self) -> bool {
        matches!(self.mode, ShellMode::Human { verbose: true, .. })
    }

    /// Print a status message: `{status:>12} {message}`.
    ///
    /// Ignored in JSON mode.
    pub fn status(&self, status: Status, msg: impl Display) {
        if self.is_json() {
            return;
        }
        eprintln!("{} {}", self.format_status(status), msg);
    }

    /// Print a warning message.
    pub fn warn(&self, msg: impl Display) {
        self.status(Status::Warning, msg);
    }

    /// Print a plain line to stdout (human mode only).
    pub fn println(&self, msg: impl Display) {
        if !self.is_json() {
            println!("{}", msg);
        }
    }

    /// Print a JSON document to stdout. Only works in JSON mode.
    pub fn json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        if !self.is_json() {
            return Ok(());
        }
        let json_str = serde_json::to_string_pretty(value)?;
        println!("{}", json_str);
        io::stdout().flush()?;
        Ok(())
    }

    fn format_status(&self, status: Status) -> String {
        let text = status.as_str();
        if self.use_color() {
            format!("{}{:>width$}\x1b[0m", status.color_code(), text, width = STATUS_WIDTH)
        } else {
            format!("{:>width$}", text, width = STATUS_WIDTH)
        }
    }

    /// Start a spinner for a long phase.
    ///
    /// JSON and verbose modes get no spinner; verbose prints the status line
    /// immediately instead.
    pub fn spinner(&self, status: Status, msg: impl Display) -> Spinner {
        if self.is_json() {
            return Spinner { pb: None };
        }
        if self.is_verbose() || !io::stderr().is_terminal() {
            self.status(status, msg);
            return Spinner { pb: None };
        }

        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("{} {}", status.as_str(), msg));
        pb.enable_steady_tick(Duration::from_millis(100));
        Spinner { pb: Some(pb) }
    }
}

impl Default for Shell {
    fn default() -> Self {
        Shell::new(ShellMode::Human {
            verbose: false,
            color: false,
        })
    }
}

/// A spinner that clears itself when finished or dropped.
pub struct Spinner {
    pb: Option<ProgressBar>,
}

impl Spinner {
    pub fn finish(self) {}
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if let Some(pb) = &self.pb {
            pb.finish_and_clear();
        }
    }
}
