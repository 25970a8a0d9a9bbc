#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::assert::Assert;
use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

/// Stands in for `terraform`. State lives in the workspace it is run from;
/// marker files copied from the module (`fail-apply`, `fail-destroy`) force
/// failures.
const FAKE_TOOL: &str = r#"#!/bin/sh
cmd="$1"
shift
if [ -n "$INFRATEST_FAKE_LOG" ]; then
    echo "$(basename "$PWD") $cmd $*" >> "$INFRATEST_FAKE_LOG"
fi
case "$cmd" in
init)
    mkdir -p .terraform
    ;;
apply)
    for arg in "$@"; do
        case "$arg" in
        -var-file=*)
            file="${arg#-var-file=}"
            if [ ! -f "$file" ]; then
                echo "Error: Failed to read variables file $file" >&2
                exit 1
            fi
            ;;
        esac
    done
    if grep -q stale terraform.tfstate 2>/dev/null; then
        echo "Error: workspace carries local state from the module source" >&2
        exit 1
    fi
    if [ -f fail-apply ]; then
        echo "Error: creating VPC: UnauthorizedOperation" >&2
        exit 1
    fi
    touch terraform.tfstate
    ;;
output)
    name="$3"
    if [ -f terraform.tfstate ] && [ -f "outputs/$name.json" ]; then
        cat "outputs/$name.json"
    else
        echo "Error: Output \"$name\" not found" >&2
        exit 1
    fi
    ;;
destroy)
    if [ -f fail-destroy ]; then
        echo "Error: deleting VPC: DependencyViolation" >&2
        exit 1
    fi
    rm -f terraform.tfstate
    ;;
*)
    echo "unexpected command $cmd" >&2
    exit 64
    ;;
esac
"#;

pub struct Fixture {
    pub temp: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = tempfile::Builder::new()
            .prefix("infratest-cli")
            .tempdir()
            .expect("tempdir");
        fs::write(temp.path().join("fake-tool.sh"), FAKE_TOOL).expect("write tool");
        Self { temp }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root().join("infratest.toml")
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.root().join("ws")
    }

    pub fn log_path(&self) -> PathBuf {
        self.root().join("calls.log")
    }

    /// Writes a module whose outputs are the given `(name, json)` pairs.
    pub fn module(&self, name: &str, outputs: &[(&str, &str)]) -> PathBuf {
        let dir = self.root().join("modules").join(name);
        fs::create_dir_all(dir.join("outputs")).expect("module dir");
        fs::write(dir.join("main.tf"), "module \"app\" {}\n").expect("main.tf");
        fs::write(dir.join("terraform.tfvars"), "name = \"examples\"\n").expect("tfvars");
        fs::write(dir.join("terraform.tfstate"), "{\"stale\": true}\n").expect("stale state");
        for (output, json) in outputs {
            fs::write(dir.join("outputs").join(format!("{output}.json")), json).expect("output");
        }
        dir
    }

    pub fn mark(&self, module: &str, marker: &str) {
        fs::write(self.root().join("modules").join(module).join(marker), "").expect("marker");
    }

    pub fn write_manifest(&self, contents: &str) {
        fs::write(self.manifest_path(), contents).expect("manifest");
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("infratest");
        cmd.current_dir(self.root())
            .env("INFRATEST_TOOL", "/bin/sh")
            .env(
                "INFRATEST_TOOL_ARGS",
                self.root().join("fake-tool.sh").display().to_string(),
            )
            .env("INFRATEST_TMPDIR", self.workspace_root())
            .env("INFRATEST_FAKE_LOG", self.log_path())
            .env_remove("INFRATEST_JOBS")
            .env_remove("INFRATEST_KEEP_ON_DESTROY_FAILURE")
            .env("NO_COLOR", "1");
        cmd
    }

    /// Logged tool invocations as `(workspace dir name, command line)`.
    pub fn calls(&self) -> Vec<(String, String)> {
        let Ok(log) = fs::read_to_string(self.log_path()) else {
            return Vec::new();
        };
        log.lines()
            .filter_map(|line| line.split_once(' '))
            .map(|(dir, call)| (dir.to_string(), call.to_string()))
            .collect()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(_, call)| call.starts_with(prefix))
            .count()
    }

    pub fn workspaces_left(&self) -> usize {
        fs::read_dir(self.workspace_root()).map_or(0, |entries| entries.count())
    }
}

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json")
}
