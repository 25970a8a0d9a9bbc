use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, info};

use super::{ProvisionError, ProvisionRequest, ProvisionStage, Provisioner, VariableFileSet};
use crate::core::config::Settings;
use crate::core::process::{run_command, RunOutput};
use crate::core::workspace::Workspace;

const DETAIL_LINES: usize = 20;

/// Drives a Terraform-compatible CLI (`terraform`, `tofu`) inside the
/// workspace directory.
///
/// Clones share the record of which workspaces finished `init`; `destroy`
/// only reaches the tool for those.
#[derive(Debug, Clone)]
pub struct TerraformProvisioner {
    tool: String,
    tool_args: Vec<String>,
    max_capture_bytes: usize,
    envs: Vec<(String, String)>,
    initialized: Arc<Mutex<HashSet<PathBuf>>>,
}

impl TerraformProvisioner {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            tool: settings.tool().to_string(),
            tool_args: settings.tool_args().to_vec(),
            max_capture_bytes: settings.max_capture_bytes(),
            envs: vec![
                ("TF_IN_AUTOMATION".to_string(), "1".to_string()),
                ("TF_INPUT".to_string(), "0".to_string()),
            ],
            initialized: Arc::default(),
        }
    }

    fn initialized(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.initialized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_initialized(&self, workspace: &Path) -> bool {
        self.initialized().contains(workspace)
    }

    #[must_use]
    pub fn tool(&self) -> &str {
        &self.tool
    }

    fn invoke(
        &self,
        stage: ProvisionStage,
        workspace: &Workspace,
        args: &[String],
    ) -> Result<RunOutput, ProvisionError> {
        let mut argv = self.tool_args.clone();
        argv.extend_from_slice(args);
        debug!(
            tool = %self.tool,
            args = ?argv,
            workspace = %workspace.path().display(),
            "invoking provisioning tool"
        );
        let output = run_command(
            &self.tool,
            &argv,
            &self.envs,
            workspace.path(),
            self.max_capture_bytes,
        )
        .map_err(|err| ProvisionError::Launch {
            stage,
            tool: self.tool.clone(),
            reason: format!("{err:#}"),
        })?;
        if !output.success() {
            return Err(ProvisionError::Tool {
                stage,
                code: output.code,
                detail: failure_detail(&output),
            });
        }
        Ok(output)
    }

    fn fetch_output(&self, workspace: &Workspace, name: &str) -> Result<Value, ProvisionError> {
        let args = strings(&["output", "-no-color", "-json", name]);
        let output = match self.invoke(ProvisionStage::Output, workspace, &args) {
            Ok(output) => output,
            Err(ProvisionError::Tool { detail, .. }) if is_missing_output(&detail, name) => {
                return Err(ProvisionError::OutputNotFound {
                    name: name.to_string(),
                });
            }
            Err(err) => return Err(err),
        };
        serde_json::from_str(output.stdout.trim()).map_err(|err| ProvisionError::MalformedOutput {
            name: name.to_string(),
            reason: format!("invalid JSON from {}: {err}", self.tool),
        })
    }
}

impl Provisioner for TerraformProvisioner {
    fn init(&self, workspace: &Workspace) -> Result<(), ProvisionError> {
        self.invoke(
            ProvisionStage::Init,
            workspace,
            &strings(&["init", "-input=false", "-no-color"]),
        )?;
        self.initialized().insert(workspace.path().to_path_buf());
        info!(workspace = %workspace.path().display(), "init complete");
        Ok(())
    }

    fn apply(&self, request: &ProvisionRequest<'_>) -> Result<(), ProvisionError> {
        // `apply` has no upgrade switch; providers are refreshed by re-running init.
        if request.upgrade {
            self.invoke(
                ProvisionStage::Apply,
                request.workspace,
                &strings(&["init", "-input=false", "-no-color", "-upgrade"]),
            )?;
        }
        let mut args = strings(&["apply", "-input=false", "-auto-approve", "-no-color"]);
        args.extend(var_file_args(request.variable_files));
        self.invoke(ProvisionStage::Apply, request.workspace, &args)?;
        info!(workspace = %request.workspace.path().display(), "apply complete");
        Ok(())
    }

    fn destroy(&self, request: &ProvisionRequest<'_>) -> Result<(), ProvisionError> {
        let path = request.workspace.path();
        // A failed init can still leave `.terraform/` behind.
        if !self.is_initialized(path) {
            debug!(
                workspace = %path.display(),
                "init never completed; nothing to destroy"
            );
            return Ok(());
        }
        let mut args = strings(&["destroy", "-input=false", "-auto-approve", "-no-color"]);
        args.extend(var_file_args(request.variable_files));
        self.invoke(ProvisionStage::Destroy, request.workspace, &args)?;
        self.initialized().remove(path);
        info!(workspace = %path.display(), "destroy complete");
        Ok(())
    }

    fn output(&self, workspace: &Workspace, name: &str) -> Result<String, ProvisionError> {
        let value = self.fetch_output(workspace, name)?;
        decode_scalar(name, &value)
    }

    fn output_list(&self, workspace: &Workspace, name: &str) -> Result<Vec<String>, ProvisionError> {
        let value = self.fetch_output(workspace, name)?;
        decode_list(name, &value)
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| (*arg).to_string()).collect()
}

fn var_file_args(files: &VariableFileSet) -> impl Iterator<Item = String> + '_ {
    files
        .iter()
        .map(|path| format!("-var-file={}", path.display()))
}

fn failure_detail(output: &RunOutput) -> String {
    let source = if output.stderr.trim().is_empty() {
        &output.stdout
    } else {
        &output.stderr
    };
    let lines: Vec<&str> = source
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect();
    let start = lines.len().saturating_sub(DETAIL_LINES);
    lines[start..].join("\n")
}

/// Matches `Error: Output "<name>" not found`, and the older
/// "output variable requested could not be found" wording, for `name` only.
fn is_missing_output(detail: &str, name: &str) -> bool {
    let named = format!("output \"{name}\" not found");
    detail.lines().any(|line| {
        let lowered = line.trim().to_ascii_lowercase();
        lowered.ends_with(&named.to_ascii_lowercase())
            || lowered.starts_with("the output variable requested could not be found")
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn decode_scalar(name: &str, value: &Value) -> Result<String, ProvisionError> {
    scalar_text(value).ok_or_else(|| ProvisionError::MalformedOutput {
        name: name.to_string(),
        reason: format!("expected a scalar, found {}", kind_of(value)),
    })
}

fn decode_list(name: &str, value: &Value) -> Result<Vec<String>, ProvisionError> {
    let Value::Array(items) = value else {
        return Err(ProvisionError::MalformedOutput {
            name: name.to_string(),
            reason: format!("expected a list, found {}", kind_of(value)),
        });
    };
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            scalar_text(item).ok_or_else(|| ProvisionError::MalformedOutput {
                name: name.to_string(),
                reason: format!("element {idx} is {}, not a scalar", kind_of(item)),
            })
        })
        .collect()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}
