//! The seam between the harness and the external provisioning tool.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::workspace::Workspace;

pub mod fake;
mod terraform;

pub use fake::{FakeCall, FakeProvisioner};
pub use terraform::TerraformProvisioner;

/// Tool operation a [`ProvisionError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionStage {
    Init,
    Apply,
    Destroy,
    Output,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Output => "output",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionError {
    #[error("{stage}: failed to launch {tool}: {reason}")]
    Launch {
        stage: ProvisionStage,
        tool: String,
        reason: String,
    },
    #[error("{stage} exited with status {code}: {detail}")]
    Tool {
        stage: ProvisionStage,
        code: i32,
        detail: String,
    },
    #[error("output `{name}` is not declared by the module")]
    OutputNotFound { name: String },
    #[error("output `{name}` could not be read: {reason}")]
    MalformedOutput { name: String, reason: String },
}

impl ProvisionError {
    pub fn stage(&self) -> ProvisionStage {
        match self {
            Self::Launch { stage, .. } | Self::Tool { stage, .. } => *stage,
            Self::OutputNotFound { .. } | Self::MalformedOutput { .. } => ProvisionStage::Output,
        }
    }
}

/// Ordered `-var-file` arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableFileSet(Vec<PathBuf>);

impl VariableFileSet {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self(files)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.0.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<PathBuf> for VariableFileSet {
    fn from_iter<T: IntoIterator<Item = PathBuf>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What `apply` and `destroy` are run against.
#[derive(Debug, Clone, Copy)]
pub struct ProvisionRequest<'a> {
    pub workspace: &'a Workspace,
    pub variable_files: &'a VariableFileSet,
    /// Refresh provider and module versions before applying.
    pub upgrade: bool,
}

/// Blocking interface over the provisioning tool. Each call maps to one tool
/// invocation and is never retried.
pub trait Provisioner: Send + Sync {
    fn init(&self, workspace: &Workspace) -> Result<(), ProvisionError>;

    fn apply(&self, request: &ProvisionRequest<'_>) -> Result<(), ProvisionError>;

    /// Tears down whatever `apply` created. Succeeds as a no-op when nothing
    /// was applied and tolerates being called twice.
    fn destroy(&self, request: &ProvisionRequest<'_>) -> Result<(), ProvisionError>;

    fn output(&self, workspace: &Workspace, name: &str) -> Result<String, ProvisionError>;

    /// Reads a list output in the order the module emits it.
    fn output_list(&self, workspace: &Workspace, name: &str) -> Result<Vec<String>, ProvisionError>;
}
