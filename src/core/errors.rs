//! Classified errors for resolution and installation.
//!
//! Only two failure kinds are classified by the core: something declared
//! could not be found, or something declared is malformed. Failures coming
//! from collaborators (git, registry, filesystem) travel as plain
//! `anyhow::Error` values with context attached and are never reclassified.

use std::path::PathBuf;

use thiserror::Error;

use crate::util::diagnostic::{suggestions, Diagnostic};

/// A classified core error.
#[derive(Debug, Error)]
pub enum StowageError {
    #[error("{what} not found: {target}")]
    NotFound {
        /// What kind of thing was missing ("path", "manifest", "package", ...)
        what: &'static str,
        /// The missing thing, as the user would recognize it
        target: String,
        /// Where it was declared, if known
        declared_in: Option<PathBuf>,
    },

    #[error("invalid {subject}: {message}")]
    Validation {
        /// What was being validated ("dependency `foo`", "flow pattern", ...)
        subject: String,
        message: String,
    },
}

impl StowageError {
    /// Shorthand for a not-found error.
    pub fn not_found(what: &'static str, target: impl Into<String>) -> Self {
        StowageError::NotFound {
            what,
            target: target.into(),
            declared_in: None,
        }
    }

    /// Shorthand for a validation error.
    pub fn validation(subject: impl Into<String>, message: impl Into<String>) -> Self {
        StowageError::Validation {
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Attach the manifest the failing declaration came from.
    pub fn declared_in(mut self, path: impl Into<PathBuf>) -> Self {
        if let StowageError::NotFound { declared_in, .. } = &mut self {
            *declared_in = Some(path.into());
        }
        self
    }

    /// Check whether an `anyhow` error is (or wraps) a not-found error.
    pub fn is_not_found(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<StowageError>(),
            Some(StowageError::NotFound { .. })
        )
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            StowageError::NotFound {
                what,
                target,
                declared_in,
            } => {
                let mut diag = Diagnostic::error(format!("could not find {} `{}`", what, target));
                if let Some(path) = declared_in {
                    diag = diag.with_location(path.clone());
                }
                if *what == "manifest" {
                    diag.with_suggestion(suggestions::NO_MANIFEST)
                } else {
                    diag.with_suggestion(suggestions::CHECK_DECLARATION)
                }
            }
            StowageError::Validation { subject, message } => {
                Diagnostic::error(format!("invalid {}", subject))
                    .with_context(message.clone())
                    .with_suggestion(suggestions::CHECK_DECLARATION)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_downcast() {
        let err: anyhow::Error = StowageError::not_found("path", "/nope").into();
        assert!(StowageError::is_not_found(&err));

        let err = err.context("while resolving `foo`");
        assert!(StowageError::is_not_found(&err));

        let other = anyhow::anyhow!("network down");
        assert!(!StowageError::is_not_found(&other));
    }

    #[test]
    fn test_diagnostic_includes_location() {
        let err = StowageError::not_found("manifest", "pkg-a").declared_in("/ws/Stowage.toml");
        let output = err.to_diagnostic().format(false);
        assert!(output.contains("could not find manifest `pkg-a`"));
        assert!(output.contains("/ws/Stowage.toml"));
        assert!(output.contains("stowage install <package>"));

        let err = StowageError::not_found("path", "../rules");
        assert!(err.to_diagnostic().format(false).contains("Check the dependency entry"));
    }
}
