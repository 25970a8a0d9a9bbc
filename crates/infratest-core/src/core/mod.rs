//! Implementation modules for `infratest-core`.
//!
//! Callers normally use the re-exports at the crate root.

pub mod config;
pub mod fs;
pub mod lifecycle;
pub mod outcome;
pub(crate) mod process;
pub mod provision;
pub mod suite;
pub mod validate;
pub mod workspace;
