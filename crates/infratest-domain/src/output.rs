use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A module output as the harness sees it: a scalar or an ordered list.
///
/// List order mirrors the module's own emission order; two lists with the same
/// members in a different order are not equal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputValue {
    Scalar(String),
    List(Vec<String>),
}

impl OutputValue {
    pub fn scalar(value: impl Into<String>) -> Self {
        Self::Scalar(value.into())
    }

    pub fn list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(values.into_iter().map(Into::into).collect())
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }
}

impl fmt::Display for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(value) => write!(f, "{value:?}"),
            Self::List(values) => {
                f.write_str("[")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value:?}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Expected outputs keyed by name, kept in declaration order so reports read
/// in the same order the scenario was written.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputExpectation {
    entries: IndexMap<String, OutputValue>,
}

impl OutputExpectation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the expectation for `name`.
    pub fn expect(&mut self, name: impl Into<String>, value: OutputValue) -> &mut Self {
        self.entries.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: OutputValue) -> Self {
        self.expect(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&OutputValue> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OutputValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, OutputValue)> for OutputExpectation {
    fn from_iter<T: IntoIterator<Item = (String, OutputValue)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_order_is_significant() {
        let declared = OutputValue::list(["10.30.20.0/23", "10.30.22.0/23"]);
        let permuted = OutputValue::list(["10.30.22.0/23", "10.30.20.0/23"]);
        assert_ne!(declared, permuted);
    }

    #[test]
    fn expectations_keep_insertion_order() {
        let expectation = OutputExpectation::new()
            .with("vpc_cidr", OutputValue::scalar("10.30.0.0/16"))
            .with("ecs_cluster_name", OutputValue::scalar("examples-complete-web"))
            .with("cloudwatch_log_group", OutputValue::scalar("examples-app"));
        let names: Vec<_> = expectation.iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            vec!["vpc_cidr", "ecs_cluster_name", "cloudwatch_log_group"]
        );
    }

    #[test]
    fn display_quotes_values() {
        assert_eq!(OutputValue::scalar("a").to_string(), "\"a\"");
        assert_eq!(OutputValue::list(["a", "b"]).to_string(), "[\"a\", \"b\"]");
    }

    #[test]
    fn serializes_untagged() {
        let value = serde_json::to_value(OutputValue::list(["x"])).unwrap();
        assert_eq!(value, serde_json::json!(["x"]));
        let value = serde_json::to_value(OutputValue::scalar("y")).unwrap();
        assert_eq!(value, serde_json::json!("y"));
    }
}
