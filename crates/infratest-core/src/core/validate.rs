use std::fmt;

use infratest_domain::{OutputExpectation, OutputValue};
use serde_json::{json, Value};
use tracing::debug;

use crate::core::provision::{ProvisionError, Provisioner};
use crate::core::workspace::Workspace;

/// One expectation that did not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discrepancy {
    Mismatch {
        output: String,
        expected: OutputValue,
        actual: OutputValue,
    },
    /// The output could not be read at all (undeclared, wrong shape, tool error).
    Unavailable {
        output: String,
        error: ProvisionError,
    },
}

impl Discrepancy {
    pub fn output(&self) -> &str {
        match self {
            Self::Mismatch { output, .. } | Self::Unavailable { output, .. } => output,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Mismatch {
                output,
                expected,
                actual,
            } => json!({
                "output": output,
                "kind": "mismatch",
                "message": self.to_string(),
                "expected": expected,
                "actual": actual,
            }),
            Self::Unavailable { output, error } => json!({
                "output": output,
                "kind": match error {
                    ProvisionError::OutputNotFound { .. } => "not-found",
                    _ => "unavailable",
                },
                "error": error.to_string(),
                "message": self.to_string(),
            }),
        }
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mismatch {
                output,
                expected,
                actual,
            } => {
                write!(f, "{output}: expected {expected}, got {actual}")?;
                if same_members(expected, actual) {
                    f.write_str(" (same elements, different order)")?;
                }
                Ok(())
            }
            Self::Unavailable { error, .. } => write!(f, "{error}"),
        }
    }
}

fn same_members(expected: &OutputValue, actual: &OutputValue) -> bool {
    let (OutputValue::List(expected), OutputValue::List(actual)) = (expected, actual) else {
        return false;
    };
    let mut expected = expected.clone();
    let mut actual = actual.clone();
    expected.sort();
    actual.sort();
    expected == actual
}

/// Compares one fetched value against its expectation.
pub fn compare(output: &str, expected: &OutputValue, actual: OutputValue) -> Option<Discrepancy> {
    if *expected == actual {
        return None;
    }
    Some(Discrepancy::Mismatch {
        output: output.to_string(),
        expected: expected.clone(),
        actual,
    })
}

/// Reads `name` in the shape the expectation asks for.
pub fn fetch(
    provisioner: &dyn Provisioner,
    workspace: &Workspace,
    name: &str,
    expected: &OutputValue,
) -> Result<OutputValue, ProvisionError> {
    match expected {
        OutputValue::Scalar(_) => provisioner.output(workspace, name).map(OutputValue::Scalar),
        OutputValue::List(_) => provisioner
            .output_list(workspace, name)
            .map(OutputValue::List),
    }
}

/// Checks every expectation and returns all discrepancies, in expectation
/// order. A failed read does not stop the remaining checks.
pub fn validate_outputs(
    provisioner: &dyn Provisioner,
    workspace: &Workspace,
    expectations: &OutputExpectation,
) -> Vec<Discrepancy> {
    let mut discrepancies = Vec::new();
    for (name, expected) in expectations.iter() {
        match fetch(provisioner, workspace, name, expected) {
            Ok(actual) => {
                debug!(output = name, value = %actual, "fetched output");
                discrepancies.extend(compare(name, expected, actual));
            }
            Err(error) => discrepancies.push(Discrepancy::Unavailable {
                output: name.to_string(),
                error,
            }),
        }
    }
    discrepancies
}
