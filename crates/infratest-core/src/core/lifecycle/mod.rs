//! One scenario, start to finish: isolate, init, apply, validate, destroy.
//!
//! Once a workspace exists it is owned by a [`cleanup::CleanupGuard`], so
//! destroy and directory removal happen exactly once whether the run passes,
//! fails at a stage, or unwinds.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use infratest_domain::{ModuleSource, OutputExpectation, Scenario};
use serde_json::{json, Value};
use tracing::{info, info_span, warn};

use crate::core::config::Settings;
use crate::core::outcome::CommandStatus;
use crate::core::provision::{ProvisionError, ProvisionStage, Provisioner, VariableFileSet};
use crate::core::validate::{validate_outputs, Discrepancy};
use crate::core::workspace::{materialize, CopyFilter, IsolationError, MaterializeOptions};

mod cleanup;
mod state;

pub use cleanup::CleanupReport;
pub use state::{LifecycleState, Stage};

use cleanup::CleanupGuard;
use state::Trail;

/// Per-run knobs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub variable_files: VariableFileSet,
    pub overlays: Vec<PathBuf>,
    pub upgrade: bool,
    pub filter: CopyFilter,
    /// Parent directory for the run's workspace.
    pub workspace_root: PathBuf,
    /// Leave the workspace on disk when destroy fails, so its local state can
    /// drive a manual teardown.
    pub retain_on_destroy_failure: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            variable_files: VariableFileSet::default(),
            overlays: Vec::new(),
            upgrade: true,
            filter: CopyFilter::default(),
            workspace_root: Settings::default().workspace_root().clone(),
            retain_on_destroy_failure: false,
        }
    }
}

impl RunConfig {
    #[must_use]
    pub fn from_scenario(scenario: &Scenario, settings: &Settings) -> Self {
        Self {
            variable_files: scenario.var_files.iter().cloned().collect(),
            overlays: scenario.overlays.clone(),
            upgrade: scenario.upgrade,
            filter: if scenario.copy_all {
                CopyFilter::All
            } else {
                CopyFilter::Module
            },
            workspace_root: settings.workspace_root().clone(),
            retain_on_destroy_failure: settings.retain_on_destroy_failure(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunFailure {
    #[error("isolation failed: {0}")]
    Isolation(#[from] IsolationError),
    #[error("{0}")]
    Provision(ProvisionError),
    #[error("{count} output expectation(s) not met")]
    Validation { count: usize },
    #[error("cleanup: {0}")]
    Destroy(ProvisionError),
    #[error("cleanup: failed to remove workspace: {0}")]
    Removal(String),
}

impl RunFailure {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Isolation(_) => Stage::Isolate,
            Self::Provision(err) => match err.stage() {
                ProvisionStage::Init => Stage::Init,
                ProvisionStage::Apply => Stage::Apply,
                ProvisionStage::Output => Stage::Validate,
                ProvisionStage::Destroy => Stage::Destroy,
            },
            Self::Validation { .. } => Stage::Validate,
            Self::Destroy(_) | Self::Removal(_) => Stage::Destroy,
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "stage": self.stage(),
            "message": self.to_string(),
        })
    }
}

/// Everything a run produced.
#[derive(Debug)]
pub struct RunReport {
    pub scenario: Option<String>,
    pub module: ModuleSource,
    pub workspace: Option<PathBuf>,
    pub states: Vec<LifecycleState>,
    /// The first thing that went wrong.
    pub failure: Option<RunFailure>,
    /// Cleanup errors that happened after `failure`.
    pub secondary: Vec<RunFailure>,
    pub discrepancies: Vec<Discrepancy>,
    pub cleanup: CleanupReport,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        self.failure.as_ref().map(RunFailure::stage)
    }

    pub fn final_state(&self) -> Option<LifecycleState> {
        self.states.last().copied()
    }

    pub fn label(&self) -> String {
        self.scenario
            .clone()
            .unwrap_or_else(|| self.module.label())
    }

    pub fn status(&self) -> CommandStatus {
        match &self.failure {
            None => CommandStatus::Ok,
            Some(RunFailure::Validation { .. }) if self.secondary.is_empty() => {
                CommandStatus::UserError
            }
            Some(_) => CommandStatus::Failure,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "scenario": self.scenario,
            "module": self.module.to_string(),
            "workspace": self.workspace.as_ref().map(|path| path.display().to_string()),
            "status": self.status().label(),
            "states": self.states.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "failure": self.failure.as_ref().map(RunFailure::to_json),
            "secondary": self.secondary.iter().map(RunFailure::to_json).collect::<Vec<_>>(),
            "discrepancies": self.discrepancies.iter().map(Discrepancy::to_json).collect::<Vec<_>>(),
            "cleanup": self.cleanup.to_json(),
            "elapsed_ms": u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX),
        })
    }
}

/// Drives modules through the lifecycle against one provisioner.
///
/// The runner holds no per-run state, so one instance may serve many
/// concurrent runs.
#[derive(Clone)]
pub struct LifecycleRunner {
    provisioner: Arc<dyn Provisioner>,
}

impl LifecycleRunner {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self { provisioner }
    }

    pub fn run_scenario(&self, scenario: &Scenario, settings: &Settings) -> RunReport {
        let span = info_span!("scenario", scenario = %scenario.name);
        let _guard = span.enter();
        let config = RunConfig::from_scenario(scenario, settings);
        let mut report = self.run(&scenario.source, &scenario.expect, &config);
        report.scenario = Some(scenario.name.clone());
        report
    }

    pub fn run(
        &self,
        source: &ModuleSource,
        expectations: &OutputExpectation,
        config: &RunConfig,
    ) -> RunReport {
        let started = Instant::now();
        let mut trail = Trail::default();
        let mut report = RunReport {
            scenario: None,
            module: source.clone(),
            workspace: None,
            states: Vec::new(),
            failure: None,
            secondary: Vec::new(),
            discrepancies: Vec::new(),
            cleanup: CleanupReport::default(),
            elapsed: Duration::ZERO,
        };

        let options = MaterializeOptions {
            root: config.workspace_root.clone(),
            overlays: config.overlays.clone(),
            filter: config.filter,
        };
        let workspace = match materialize(source, &options) {
            Ok(workspace) => workspace,
            Err(err) => {
                warn!(module = %source, error = %err, "isolation failed");
                trail.fail(Stage::Isolate);
                report.failure = Some(RunFailure::Isolation(err));
                report.states = trail.into_states();
                report.elapsed = started.elapsed();
                return report;
            }
        };
        report.workspace = Some(workspace.path().to_path_buf());
        trail.advance(LifecycleState::Created);

        let guard = CleanupGuard::new(
            self.provisioner.as_ref(),
            workspace,
            &config.variable_files,
            config.upgrade,
            config.retain_on_destroy_failure,
        );
        report.failure = self.provision(&guard, expectations, &mut trail, &mut report.discrepancies);

        let cleanup = guard.finish();
        let mut cleanup_failures = Vec::new();
        if let Some(err) = &cleanup.destroy_error {
            cleanup_failures.push(RunFailure::Destroy(err.clone()));
        }
        if let Some(reason) = &cleanup.removal_error {
            cleanup_failures.push(RunFailure::Removal(reason.clone()));
        }
        if cleanup.destroy_error.is_some() {
            trail.fail(Stage::Destroy);
        } else {
            trail.advance(LifecycleState::Destroyed);
        }
        if report.failure.is_none() && !cleanup_failures.is_empty() {
            report.failure = Some(cleanup_failures.remove(0));
        }
        report.secondary = cleanup_failures;
        report.cleanup = cleanup;
        report.states = trail.into_states();
        report.elapsed = started.elapsed();

        match &report.failure {
            None => info!(module = %source, elapsed = ?report.elapsed, "run passed"),
            Some(failure) => warn!(
                module = %source,
                stage = %failure.stage(),
                error = %failure,
                "run failed"
            ),
        }
        report
    }

    fn provision(
        &self,
        guard: &CleanupGuard<'_>,
        expectations: &OutputExpectation,
        trail: &mut Trail,
        discrepancies: &mut Vec<Discrepancy>,
    ) -> Option<RunFailure> {
        if let Err(err) = self.provisioner.init(guard.workspace()) {
            trail.fail(Stage::Init);
            return Some(RunFailure::Provision(err));
        }
        trail.advance(LifecycleState::Initialized);

        if let Err(err) = self.provisioner.apply(&guard.request()) {
            trail.fail(Stage::Apply);
            return Some(RunFailure::Provision(err));
        }
        trail.advance(LifecycleState::Applied);

        *discrepancies = validate_outputs(self.provisioner.as_ref(), guard.workspace(), expectations);
        if discrepancies.is_empty() {
            trail.advance(LifecycleState::Validated);
            return None;
        }
        for discrepancy in discrepancies.iter() {
            warn!(output = discrepancy.output(), "{discrepancy}");
        }
        trail.fail(Stage::Validate);
        Some(RunFailure::Validation {
            count: discrepancies.len(),
        })
    }
}
