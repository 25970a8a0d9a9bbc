//! In-memory stand-in for the provisioning tool.
//!
//! Records every call so lifecycle tests can assert how often and in which
//! order the tool would have been driven, without spawning a process.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use indexmap::IndexMap;
use infratest_domain::OutputValue;

use super::{ProvisionError, ProvisionRequest, ProvisionStage, Provisioner};
use crate::core::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    Init,
    Apply {
        upgrade: bool,
        variable_files: Vec<PathBuf>,
    },
    /// `workspace_present` records whether the directory still existed.
    Destroy { workspace_present: bool },
    Output(String),
    OutputList(String),
}

#[derive(Debug, Default)]
struct FakeState {
    initialized: bool,
    applied: bool,
    calls: Vec<FakeCall>,
}

#[derive(Debug, Default)]
pub struct FakeProvisioner {
    outputs: IndexMap<String, OutputValue>,
    failing: HashSet<ProvisionStage>,
    state: Mutex<FakeState>,
}

impl FakeProvisioner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an output the module emits once applied.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, value: OutputValue) -> Self {
        self.outputs.insert(name.into(), value);
        self
    }

    /// Makes every call of `stage` fail with exit status 1.
    #[must_use]
    pub fn failing(mut self, stage: ProvisionStage) -> Self {
        self.failing.insert(stage);
        self
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.lock().calls.clone()
    }

    pub fn destroy_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, FakeCall::Destroy { .. }))
            .count()
    }

    /// Whether resources would still exist after the recorded calls.
    pub fn is_applied(&self) -> bool {
        self.lock().applied
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        // Poisoned by a panicking test thread.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check(&self, stage: ProvisionStage) -> Result<(), ProvisionError> {
        if self.failing.contains(&stage) {
            return Err(ProvisionError::Tool {
                stage,
                code: 1,
                detail: format!("Error: simulated {stage} failure"),
            });
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<&OutputValue, ProvisionError> {
        self.check(ProvisionStage::Output)?;
        let applied = self.lock().applied;
        match self.outputs.get(name) {
            Some(value) if applied => Ok(value),
            _ => Err(ProvisionError::OutputNotFound {
                name: name.to_string(),
            }),
        }
    }
}

impl Provisioner for FakeProvisioner {
    fn init(&self, _workspace: &Workspace) -> Result<(), ProvisionError> {
        self.lock().calls.push(FakeCall::Init);
        self.check(ProvisionStage::Init)?;
        self.lock().initialized = true;
        Ok(())
    }

    fn apply(&self, request: &ProvisionRequest<'_>) -> Result<(), ProvisionError> {
        self.lock().calls.push(FakeCall::Apply {
            upgrade: request.upgrade,
            variable_files: request.variable_files.iter().map(PathBuf::from).collect(),
        });
        self.check(ProvisionStage::Apply)?;
        let mut state = self.lock();
        if !state.initialized {
            return Err(ProvisionError::Tool {
                stage: ProvisionStage::Apply,
                code: 1,
                detail: "Error: module not installed; run init".to_string(),
            });
        }
        state.applied = true;
        Ok(())
    }

    fn destroy(&self, request: &ProvisionRequest<'_>) -> Result<(), ProvisionError> {
        let workspace_present = request.workspace.path().is_dir();
        self.lock().calls.push(FakeCall::Destroy { workspace_present });
        self.check(ProvisionStage::Destroy)?;
        self.lock().applied = false;
        Ok(())
    }

    fn output(&self, _workspace: &Workspace, name: &str) -> Result<String, ProvisionError> {
        self.lock().calls.push(FakeCall::Output(name.to_string()));
        match self.lookup(name)? {
            OutputValue::Scalar(value) => Ok(value.clone()),
            OutputValue::List(_) => Err(ProvisionError::MalformedOutput {
                name: name.to_string(),
                reason: "expected a scalar, found a list".to_string(),
            }),
        }
    }

    fn output_list(&self, _workspace: &Workspace, name: &str) -> Result<Vec<String>, ProvisionError> {
        self.lock().calls.push(FakeCall::OutputList(name.to_string()));
        match self.lookup(name)? {
            OutputValue::List(values) => Ok(values.clone()),
            OutputValue::Scalar(_) => Err(ProvisionError::MalformedOutput {
                name: name.to_string(),
                reason: "expected a list, found a string".to_string(),
            }),
        }
    }
}
