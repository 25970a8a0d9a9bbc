//! Manifest-driven commands: run a selection of scenarios in parallel, or
//! list what a manifest declares.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use infratest_domain::{discover_manifest, load_manifest, ManifestError, Scenario, ScenarioManifest};
use rayon::prelude::*;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::core::config::Settings;
use crate::core::lifecycle::{LifecycleRunner, RunReport};
use crate::core::outcome::{CommandStatus, ExecutionOutcome};
use crate::core::provision::TerraformProvisioner;

#[derive(Debug, Clone, Default)]
pub struct RunSuiteRequest {
    /// Explicit manifest; discovered upward from the working directory otherwise.
    pub manifest: Option<PathBuf>,
    /// Scenario names to run; empty means all.
    pub only: Vec<String>,
    pub jobs: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub manifest: Option<PathBuf>,
}

/// Runs the selected scenarios against the configured tool.
pub fn run_suite(settings: &Settings, request: &RunSuiteRequest) -> Result<ExecutionOutcome> {
    let runner = LifecycleRunner::new(Arc::new(TerraformProvisioner::from_settings(settings)));
    run_suite_with(&runner, settings, request)
}

pub fn run_suite_with(
    runner: &LifecycleRunner,
    settings: &Settings,
    request: &RunSuiteRequest,
) -> Result<ExecutionOutcome> {
    let manifest = match locate(request.manifest.as_deref()) {
        Ok(manifest) => manifest,
        Err(err) => return Ok(manifest_error_outcome(&err)),
    };
    let selected = match select(&manifest, &request.only) {
        Ok(selected) => selected,
        Err(unknown) => {
            return Ok(ExecutionOutcome::user_error(
                format!("unknown scenario(s): {}", unknown.join(", ")),
                json!({
                    "manifest": manifest.path.display().to_string(),
                    "unknown": unknown,
                    "available": manifest.scenarios.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
                    "hint": "run `infratest list` to see declared scenarios",
                }),
            ));
        }
    };
    if selected.is_empty() {
        return Ok(ExecutionOutcome::success(
            "no scenarios to run",
            json!({ "manifest": manifest.path.display().to_string(), "scenarios": [] }),
        ));
    }

    let jobs = request.jobs.or(settings.jobs()).unwrap_or(0);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .thread_name(|idx| format!("infratest-{idx}"))
        .build()
        .context("failed to start scenario worker pool")?;
    info!(
        manifest = %manifest.path.display(),
        scenarios = selected.len(),
        jobs = pool.current_num_threads(),
        tool = settings.tool(),
        "running scenarios"
    );
    let reports: Vec<RunReport> = pool.install(|| {
        selected
            .par_iter()
            .map(|scenario| runner.run_scenario(scenario, settings))
            .collect()
    });

    Ok(suite_outcome(&manifest.path, &reports))
}

pub fn list_scenarios(request: &ListRequest) -> Result<ExecutionOutcome> {
    let manifest = match locate(request.manifest.as_deref()) {
        Ok(manifest) => manifest,
        Err(err) => return Ok(manifest_error_outcome(&err)),
    };
    let scenarios: Vec<Value> = manifest
        .scenarios
        .iter()
        .map(|scenario| {
            json!({
                "name": scenario.name,
                "module": scenario.source.to_string(),
                "var_files": scenario.var_files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
                "overlays": scenario.overlays.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
                "upgrade": scenario.upgrade,
                "expect": scenario.expect,
            })
        })
        .collect();
    let message = match scenarios.len() {
        1 => "1 scenario".to_string(),
        n => format!("{n} scenarios"),
    };
    Ok(ExecutionOutcome::success(
        message,
        json!({
            "manifest": manifest.path.display().to_string(),
            "scenarios": scenarios,
        }),
    ))
}

fn locate(explicit: Option<&Path>) -> Result<ScenarioManifest, ManifestError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let cwd = env::current_dir().map_err(|source| ManifestError::Read {
                path: PathBuf::from("."),
                source,
            })?;
            discover_manifest(&cwd)?
        }
    };
    debug!(manifest = %path.display(), "loading manifest");
    load_manifest(&path)
}

/// Returns the requested scenarios in manifest order, or the names that do
/// not exist.
fn select<'a>(
    manifest: &'a ScenarioManifest,
    only: &[String],
) -> std::result::Result<Vec<&'a Scenario>, Vec<String>> {
    if only.is_empty() {
        return Ok(manifest.scenarios.iter().collect());
    }
    let unknown: Vec<String> = only
        .iter()
        .filter(|name| manifest.find(name).is_none())
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(unknown);
    }
    Ok(manifest
        .scenarios
        .iter()
        .filter(|scenario| only.contains(&scenario.name))
        .collect())
}

fn manifest_error_outcome(err: &ManifestError) -> ExecutionOutcome {
    let hint = match err {
        ManifestError::NotFound { .. } => {
            Some("create an infratest.toml or pass --manifest <path>")
        }
        _ => None,
    };
    ExecutionOutcome::user_error(
        err.to_string(),
        json!({ "reason": "manifest", "hint": hint }),
    )
}

fn suite_outcome(manifest: &Path, reports: &[RunReport]) -> ExecutionOutcome {
    let status = CommandStatus::worst(reports.iter().map(RunReport::status));
    let failed: Vec<String> = reports
        .iter()
        .filter(|report| !report.passed())
        .map(|report| match report.failed_stage() {
            Some(stage) => format!("{} ({stage})", report.label()),
            None => report.label(),
        })
        .collect();
    let message = if failed.is_empty() {
        match reports.len() {
            1 => "1 scenario passed".to_string(),
            n => format!("{n} scenarios passed"),
        }
    } else {
        format!(
            "{} of {} scenario(s) failed: {}",
            failed.len(),
            reports.len(),
            failed.join(", ")
        )
    };
    let details = json!({
        "manifest": manifest.display().to_string(),
        "passed": reports.len() - failed.len(),
        "failed": failed.len(),
        "scenarios": reports.iter().map(RunReport::to_json).collect::<Vec<_>>(),
    });
    ExecutionOutcome {
        status,
        message,
        details,
    }
}
