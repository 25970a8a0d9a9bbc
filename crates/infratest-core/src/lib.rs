#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]

mod core;

pub use infratest_domain::{
    discover_manifest, load_manifest, parse_manifest, ManifestError, ModuleSource,
    OutputExpectation, OutputValue, Scenario, ScenarioManifest, MANIFEST_FILE,
};

pub use crate::core::config::{GlobalOptions, Settings, DEFAULT_TOOL};
pub use crate::core::fs::{copy_file, CopyError, CopyMethod};
pub use crate::core::lifecycle::{
    CleanupReport, LifecycleRunner, LifecycleState, RunConfig, RunFailure, RunReport, Stage,
};
pub use crate::core::outcome::{
    format_status_message, to_json_response, CommandStatus, ExecutionOutcome,
};
pub use crate::core::provision::{
    FakeCall, FakeProvisioner, ProvisionError, ProvisionRequest, ProvisionStage, Provisioner,
    TerraformProvisioner, VariableFileSet,
};
pub use crate::core::suite::{list_scenarios, run_suite, run_suite_with, ListRequest, RunSuiteRequest};
pub use crate::core::validate::{compare, validate_outputs, Discrepancy};
pub use crate::core::workspace::{
    materialize, CopyFilter, IsolationError, MaterializeOptions, Workspace,
};
