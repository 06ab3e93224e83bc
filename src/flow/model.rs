//! Flow definitions: static per-platform mapping rules.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// How a flow's output is combined with what is already at the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Target content becomes the source content verbatim
    #[default]
    Replace,
    /// Structured (JSON/TOML) merge with per-key ownership
    Deep,
    /// Package-attributed text blocks
    Composite,
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePolicy::Replace => write!(f, "replace"),
            MergePolicy::Deep => write!(f, "deep"),
            MergePolicy::Composite => write!(f, "composite"),
        }
    }
}

/// A precondition on the target workspace.
///
/// Written as `condition = { exists = ".cursor" }` in TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowCondition {
    /// Workspace-relative path must exist
    Exists(String),
    /// Workspace-relative path must not exist
    Missing(String),
}

impl FlowCondition {
    /// Evaluate against a workspace root.
    pub fn holds(&self, root: &Path) -> bool {
        match self {
            FlowCondition::Exists(path) => root.join(path).exists(),
            FlowCondition::Missing(path) => !root.join(path).exists(),
        }
    }
}

/// One mapping rule: source pattern to target pattern with a merge policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    pub from: String,
    pub to: String,

    #[serde(default)]
    pub merge: MergePolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<FlowCondition>,
}

impl Flow {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Flow {
            from: from.into(),
            to: to.into(),
            merge: MergePolicy::Replace,
            condition: None,
        }
    }

    pub fn merge(mut self, merge: MergePolicy) -> Self {
        self.merge = merge;
        self
    }

    pub fn when(mut self, condition: FlowCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Short label used in error reports.
    pub fn label(&self) -> String {
        format!("{} -> {}", self.from, self.to)
    }
}
