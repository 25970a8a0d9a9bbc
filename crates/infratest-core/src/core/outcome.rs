use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Result of one CLI command, rendered as text or as a JSON envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            details,
        }
    }

    pub fn failure(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Failure,
            message: message.into(),
            details,
        }
    }

    pub fn user_error(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::UserError,
            message: message.into(),
            details,
        }
    }
}

/// `UserError` covers outputs that disagree with expectations and bad input;
/// `Failure` covers tool, isolation and cleanup errors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}

impl CommandStatus {
    /// Folds several results into the most severe one.
    pub fn worst(statuses: impl IntoIterator<Item = Self>) -> Self {
        statuses.into_iter().max().unwrap_or(Self::Ok)
    }

    pub fn exit_code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::UserError => 1,
            Self::Failure => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::UserError => "user-error",
            Self::Failure => "error",
        }
    }
}

/// Prefixes `message` with the command name unless it already carries it.
#[must_use]
pub fn format_status_message(command: &str, message: &str) -> String {
    let prefix = format!("infratest {command}");
    if message.is_empty() {
        prefix
    } else if message.starts_with(&prefix) {
        message.to_string()
    } else {
        format!("{prefix}: {message}")
    }
}

/// The `{status, message, details}` envelope printed under `--json`.
pub fn to_json_response(command: &str, outcome: &ExecutionOutcome) -> Value {
    let details = match &outcome.details {
        Value::Object(_) => outcome.details.clone(),
        Value::Null => json!({}),
        other => json!({ "value": other }),
    };
    json!({
        "status": outcome.status.label(),
        "message": format_status_message(command, &outcome.message),
        "details": details,
    })
}
