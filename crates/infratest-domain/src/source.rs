use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Identifies a module tree to test: `root` joined with `relative`.
///
/// Read-only input. Workspaces are built from it but never write back.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleSource {
    root: PathBuf,
    relative: PathBuf,
}

impl ModuleSource {
    pub fn new(root: impl Into<PathBuf>, relative: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            relative: relative.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn relative(&self) -> &Path {
        &self.relative
    }

    /// Directory holding the module's files.
    pub fn module_dir(&self) -> PathBuf {
        self.root.join(&self.relative)
    }

    /// Short label used for temp dir prefixes and log lines.
    pub fn label(&self) -> String {
        let dir = self.module_dir();
        dir.file_name()
            .or_else(|| self.root.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "module".to_string())
    }
}

impl fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.module_dir().display())
    }
}
