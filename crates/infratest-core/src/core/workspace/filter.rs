use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

/// Hidden entries that still belong to a module.
const KEPT_HIDDEN_FILES: [&str; 2] = [".terraform-version", ".terraform.lock.hcl"];

/// Auto-loaded variable files; a scenario has to overlay these explicitly.
const AUTO_VAR_FILES: [&str; 2] = ["terraform.tfvars", "terraform.tfvars.json"];

const STATE_SUFFIXES: [&str; 2] = [".tfstate", ".tfstate.backup"];

/// Decides which entries of a module tree reach the workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CopyFilter {
    /// Skip hidden entries, local state and auto-loaded variable files so a
    /// developer's own runs never leak into the test.
    #[default]
    Module,
    /// Copy everything verbatim.
    All,
}

impl CopyFilter {
    /// `relative` is the entry's path below the module directory.
    pub fn admits(self, relative: &Path, is_dir: bool) -> bool {
        match self {
            Self::All => true,
            Self::Module => {
                let Some(name) = relative.file_name().and_then(|name| name.to_str()) else {
                    return true;
                };
                if !is_dir && KEPT_HIDDEN_FILES.contains(&name) {
                    return !parent_is_hidden(relative);
                }
                if contains_hidden_component(relative) {
                    return false;
                }
                if is_dir {
                    return true;
                }
                !(AUTO_VAR_FILES.contains(&name)
                    || STATE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
            }
        }
    }
}

/// Files the provisioning tool rewrites in place once a run starts: local
/// state, the dependency lock file and anything under `.terraform/`. These
/// must never share storage with the module source.
pub(crate) fn rewritten_by_tool(relative: &Path) -> bool {
    if relative
        .components()
        .any(|component| component == Component::Normal(".terraform".as_ref()))
    {
        return true;
    }
    relative
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| {
            name == ".terraform.lock.hcl"
                || STATE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
        })
}

fn is_hidden(component: Component<'_>) -> bool {
    match component {
        Component::Normal(name) => name.to_str().is_some_and(|name| name.starts_with('.')),
        _ => false,
    }
}

fn contains_hidden_component(path: &Path) -> bool {
    path.components().any(is_hidden)
}

fn parent_is_hidden(path: &Path) -> bool {
    path.parent().is_some_and(contains_hidden_component)
}
