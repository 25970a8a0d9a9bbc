#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod manifest;
pub mod output;
pub mod source;

pub use manifest::{
    discover_manifest, load_manifest, parse_manifest, ManifestError, Scenario, ScenarioManifest,
    MANIFEST_FILE,
};
pub use output::{OutputExpectation, OutputValue};
pub use source::ModuleSource;
