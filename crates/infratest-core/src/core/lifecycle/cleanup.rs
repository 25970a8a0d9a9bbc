use std::path::PathBuf;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::core::provision::{ProvisionError, ProvisionRequest, Provisioner, VariableFileSet};
use crate::core::workspace::Workspace;

/// What happened while tearing a run down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub destroy_error: Option<ProvisionError>,
    pub removal_error: Option<String>,
    /// Set when the workspace was deliberately left on disk.
    pub retained: Option<PathBuf>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.destroy_error.is_none() && self.removal_error.is_none()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "destroy_error": self.destroy_error.as_ref().map(ToString::to_string),
            "removal_error": self.removal_error,
            "retained": self.retained.as_ref().map(|path| path.display().to_string()),
        })
    }
}

/// Owns a workspace and tears it down exactly once: destroy first, then
/// remove the directory.
///
/// [`CleanupGuard::finish`] runs teardown and returns the outcome. If the guard
/// is dropped without `finish` (a panic inside the tool adapter, for instance)
/// teardown still runs from `Drop`.
pub(crate) struct CleanupGuard<'a> {
    provisioner: &'a dyn Provisioner,
    workspace: Option<Workspace>,
    variable_files: &'a VariableFileSet,
    upgrade: bool,
    retain_on_destroy_failure: bool,
}

impl<'a> CleanupGuard<'a> {
    pub(crate) fn new(
        provisioner: &'a dyn Provisioner,
        workspace: Workspace,
        variable_files: &'a VariableFileSet,
        upgrade: bool,
        retain_on_destroy_failure: bool,
    ) -> Self {
        Self {
            provisioner,
            workspace: Some(workspace),
            variable_files,
            upgrade,
            retain_on_destroy_failure,
        }
    }

    pub(crate) fn workspace(&self) -> &Workspace {
        match &self.workspace {
            Some(workspace) => workspace,
            None => unreachable!("workspace is only taken once the guard is consumed"),
        }
    }

    pub(crate) fn request(&self) -> ProvisionRequest<'_> {
        ProvisionRequest {
            workspace: self.workspace(),
            variable_files: self.variable_files,
            upgrade: self.upgrade,
        }
    }

    pub(crate) fn finish(mut self) -> CleanupReport {
        self.teardown()
    }

    fn teardown(&mut self) -> CleanupReport {
        let Some(workspace) = self.workspace.take() else {
            return CleanupReport::default();
        };
        let path = workspace.path().to_path_buf();

        let destroy_error = {
            let request = ProvisionRequest {
                workspace: &workspace,
                variable_files: self.variable_files,
                upgrade: self.upgrade,
            };
            self.provisioner.destroy(&request).err()
        };
        if let Some(err) = &destroy_error {
            warn!(workspace = %path.display(), error = %err, "destroy failed");
            if self.retain_on_destroy_failure {
                let retained = workspace.keep();
                warn!(
                    workspace = %retained.display(),
                    "keeping workspace so its state can be used for manual teardown"
                );
                return CleanupReport {
                    destroy_error,
                    removal_error: None,
                    retained: Some(retained),
                };
            }
        }

        let removal_error = match workspace.release() {
            Ok(()) => None,
            Err(err) => {
                warn!(workspace = %path.display(), error = %format!("{err:#}"), "workspace removal failed");
                Some(format!("{err:#}"))
            }
        };
        if destroy_error.is_none() && removal_error.is_none() {
            info!(workspace = %path.display(), "cleanup complete");
        }
        CleanupReport {
            destroy_error,
            removal_error,
            retained: None,
        }
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        if self.workspace.is_some() {
            warn!("run ended without explicit cleanup; tearing down from drop");
            let _ = self.teardown();
        }
    }
}
