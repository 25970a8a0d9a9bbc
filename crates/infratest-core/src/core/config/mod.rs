use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::process::DEFAULT_MAX_CAPTURE_BYTES;

pub const DEFAULT_TOOL: &str = "terraform";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub verbose: u8,
    pub trace: bool,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Process-wide knobs read from `INFRATEST_*` variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub(crate) tool: String,
    /// Leading arguments for wrapper commands (`aws-vault exec sandbox -- terraform`).
    pub(crate) tool_args: Vec<String>,
    pub(crate) workspace_root: PathBuf,
    pub(crate) max_capture_bytes: usize,
    pub(crate) jobs: Option<usize>,
    pub(crate) retain_on_destroy_failure: bool,
}

impl Settings {
    /// Builds settings from the current process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Self {
        Self {
            tool: snapshot
                .var("INFRATEST_TOOL")
                .unwrap_or(DEFAULT_TOOL)
                .to_string(),
            tool_args: snapshot
                .var("INFRATEST_TOOL_ARGS")
                .map(parse_tool_args)
                .unwrap_or_default(),
            workspace_root: snapshot
                .var("INFRATEST_TMPDIR")
                .map_or_else(default_workspace_root, PathBuf::from),
            max_capture_bytes: snapshot
                .var("INFRATEST_MAX_CAPTURE_BYTES")
                .and_then(|raw| raw.trim().parse::<usize>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_MAX_CAPTURE_BYTES),
            jobs: snapshot
                .var("INFRATEST_JOBS")
                .and_then(|raw| raw.trim().parse::<usize>().ok())
                .filter(|value| *value > 0),
            retain_on_destroy_failure: snapshot
                .var("INFRATEST_KEEP_ON_DESTROY_FAILURE")
                .is_some_and(is_truthy),
        }
    }

    #[must_use]
    pub fn tool(&self) -> &str {
        &self.tool
    }

    #[must_use]
    pub fn tool_args(&self) -> &[String] {
        &self.tool_args
    }

    #[must_use]
    pub fn workspace_root(&self) -> &PathBuf {
        &self.workspace_root
    }

    #[must_use]
    pub fn max_capture_bytes(&self) -> usize {
        self.max_capture_bytes
    }

    #[must_use]
    pub fn jobs(&self) -> Option<usize> {
        self.jobs
    }

    /// Whether a workspace whose destroy failed is left on disk.
    #[must_use]
    pub fn retain_on_destroy_failure(&self) -> bool {
        self.retain_on_destroy_failure
    }

    #[must_use]
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    #[must_use]
    pub fn with_tool_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    #[must_use]
    pub fn with_retain_on_destroy_failure(mut self, retain: bool) -> Self {
        self.retain_on_destroy_failure = retain;
        self
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_snapshot(&EnvSnapshot {
            vars: HashMap::new(),
        })
    }
}

fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn default_workspace_root() -> PathBuf {
    env::temp_dir().join("infratest")
}

/// Splits `INFRATEST_TOOL_ARGS` with POSIX shell quoting, so a wrapper path
/// containing spaces can be quoted. Unbalanced quotes fall back to plain
/// whitespace splitting.
fn parse_tool_args(raw: &str) -> Vec<String> {
    shell_words::split(raw).unwrap_or_else(|err| {
        warn!(value = raw, error = %err, "INFRATEST_TOOL_ARGS is not valid shell syntax; splitting on whitespace");
        raw.split_whitespace().map(ToOwned::to_owned).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_apply_without_overrides() {
        let settings = Settings::from_snapshot(&EnvSnapshot::testing(&[]));
        assert_eq!(settings.tool(), "terraform");
        assert!(settings.tool_args().is_empty());
        assert_eq!(settings.workspace_root(), &env::temp_dir().join("infratest"));
        assert_eq!(settings.max_capture_bytes(), DEFAULT_MAX_CAPTURE_BYTES);
        assert_eq!(settings.jobs(), None);
        assert!(!settings.retain_on_destroy_failure());
    }

    #[test]
    fn overrides_are_read_from_snapshot() {
        let snapshot = EnvSnapshot::testing(&[
            ("INFRATEST_TOOL", "aws-vault"),
            ("INFRATEST_TOOL_ARGS", "exec sandbox --  tofu"),
            ("INFRATEST_TMPDIR", "/scratch/it"),
            ("INFRATEST_MAX_CAPTURE_BYTES", "2048"),
            ("INFRATEST_JOBS", "3"),
            ("INFRATEST_KEEP_ON_DESTROY_FAILURE", "True"),
        ]);
        let settings = Settings::from_snapshot(&snapshot);
        assert_eq!(settings.tool(), "aws-vault");
        assert_eq!(settings.tool_args(), ["exec", "sandbox", "--", "tofu"]);
        assert_eq!(settings.workspace_root(), &PathBuf::from("/scratch/it"));
        assert_eq!(settings.max_capture_bytes(), 2048);
        assert_eq!(settings.jobs(), Some(3));
        assert!(settings.retain_on_destroy_failure());
    }

    #[test]
    fn tool_args_honor_shell_quoting() {
        let snapshot = EnvSnapshot::testing(&[(
            "INFRATEST_TOOL_ARGS",
            r#"'/home/ci/My Tools/tf wrapper.sh' -- "tofu""#,
        )]);
        let settings = Settings::from_snapshot(&snapshot);
        assert_eq!(
            settings.tool_args(),
            ["/home/ci/My Tools/tf wrapper.sh", "--", "tofu"]
        );

        let snapshot = EnvSnapshot::testing(&[("INFRATEST_TOOL_ARGS", "exec 'sandbox")]);
        let settings = Settings::from_snapshot(&snapshot);
        assert_eq!(settings.tool_args(), ["exec", "'sandbox"]);
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let snapshot = EnvSnapshot::testing(&[
            ("INFRATEST_MAX_CAPTURE_BYTES", "lots"),
            ("INFRATEST_JOBS", "0"),
            ("INFRATEST_TOOL", "  "),
        ]);
        let settings = Settings::from_snapshot(&snapshot);
        assert_eq!(settings.max_capture_bytes(), DEFAULT_MAX_CAPTURE_BYTES);
        assert_eq!(settings.jobs(), None);
        assert_eq!(settings.tool(), "terraform");
    }

    #[test]
    #[serial]
    fn from_env_reads_process_environment() {
        env::set_var("INFRATEST_TOOL", "/opt/bin/terraform");
        let settings = Settings::from_env();
        env::remove_var("INFRATEST_TOOL");
        assert_eq!(settings.tool(), "/opt/bin/terraform");
    }
}
