//! Human rendering of command details.

use infratest_core::CommandStatus;
use serde_json::Value;

use crate::style::Style;

pub fn hint_from_details(details: &Value) -> Option<&str> {
    details
        .as_object()
        .and_then(|map| map.get("hint"))
        .and_then(Value::as_str)
}

fn status_from_label(label: &str) -> CommandStatus {
    match label {
        "ok" => CommandStatus::Ok,
        "user-error" => CommandStatus::UserError,
        _ => CommandStatus::Failure,
    }
}

/// One line per scenario, followed by its discrepancies and cleanup notes.
pub fn run_lines(style: &Style, details: &Value) -> Vec<String> {
    let Some(scenarios) = details.get("scenarios").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut lines = Vec::new();
    for scenario in scenarios {
        let name = scenario
            .get("scenario")
            .and_then(Value::as_str)
            .or_else(|| scenario.get("module").and_then(Value::as_str))
            .unwrap_or("?");
        let status = status_from_label(
            scenario
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("error"),
        );
        let elapsed = scenario
            .get("elapsed_ms")
            .and_then(Value::as_u64)
            .map(format_elapsed)
            .unwrap_or_default();
        let headline = match scenario.get("failure").filter(|f| !f.is_null()) {
            Some(failure) => format!(
                "{name} failed at {}: {}",
                failure.get("stage").and_then(Value::as_str).unwrap_or("?"),
                failure.get("message").and_then(Value::as_str).unwrap_or("")
            ),
            None => name.to_string(),
        };
        lines.push(format!("{} {}", style.item(status, &headline), style.dimmed(&elapsed)));

        let discrepancies = scenario
            .get("discrepancies")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for discrepancy in discrepancies {
            if let Some(message) = discrepancy.get("message").and_then(Value::as_str) {
                lines.push(format!("      {message}"));
            }
        }
        let secondary = scenario
            .get("secondary")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for failure in secondary {
            if let Some(message) = failure.get("message").and_then(Value::as_str) {
                lines.push(format!("      also: {message}"));
            }
        }
        if let Some(path) = scenario
            .get("cleanup")
            .and_then(|cleanup| cleanup.get("retained"))
            .and_then(Value::as_str)
        {
            lines.push(style.info(&format!("      workspace kept at {path}")));
        }
    }
    lines
}

pub fn list_lines(style: &Style, details: &Value) -> Vec<String> {
    let Some(scenarios) = details.get("scenarios").and_then(Value::as_array) else {
        return Vec::new();
    };
    let rows: Vec<(&str, &str, usize)> = scenarios
        .iter()
        .map(|scenario| {
            (
                scenario.get("name").and_then(Value::as_str).unwrap_or("?"),
                scenario.get("module").and_then(Value::as_str).unwrap_or(""),
                scenario
                    .get("expect")
                    .and_then(Value::as_object)
                    .map_or(0, serde_json::Map::len),
            )
        })
        .collect();
    let width = rows.iter().map(|(name, _, _)| name.len()).max().unwrap_or(0);
    rows.into_iter()
        .map(|(name, module, outputs)| {
            let noun = if outputs == 1 { "output" } else { "outputs" };
            format!(
                "  {name:<width$}  {module}  {}",
                style.dimmed(&format!("({outputs} {noun})"))
            )
        })
        .collect()
}

fn format_elapsed(ms: u64) -> String {
    if ms >= 60_000 {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
    } else {
        format!("{}.{}s", ms / 1000, (ms % 1000) / 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_lines_show_failures_and_discrepancies() {
        let style = Style::new(true, false);
        let details = json!({
            "scenarios": [
                {"scenario": "complete-web", "status": "ok", "failure": null, "elapsed_ms": 1200},
                {
                    "scenario": "web-proxy",
                    "status": "user-error",
                    "failure": {"stage": "validate", "message": "1 output expectation(s) not met"},
                    "discrepancies": [{"message": "vpc_cidr: expected \"10.2.0.0/16\", got \"10.3.0.0/16\""}],
                    "secondary": [],
                    "cleanup": {"retained": null},
                    "elapsed_ms": 61_000
                }
            ]
        });
        let lines = run_lines(&style, &details);
        assert_eq!(lines[0], "  ✔ complete-web 1.2s");
        assert_eq!(
            lines[1],
            "  ✗ web-proxy failed at validate: 1 output expectation(s) not met 1m01s"
        );
        assert!(lines[2].contains("vpc_cidr: expected"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn list_lines_align_names() {
        let style = Style::new(true, false);
        let details = json!({
            "scenarios": [
                {"name": "web", "module": "examples/web", "expect": {"a": "1"}},
                {"name": "complete-web", "module": "examples/complete-web", "expect": {}}
            ]
        });
        let lines = list_lines(&style, &details);
        assert_eq!(lines[0], "  web           examples/web  (1 output)");
        assert_eq!(lines[1], "  complete-web  examples/complete-web  (0 outputs)");
    }
}
