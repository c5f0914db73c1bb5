//! Console rendering for the CLI

use crate::crawler::Step;
use crate::output::summary::{OutputResult, RunSummary};
use toml::{Table, Value};

/// Key under which list results are rendered
pub const RECORDS_KEY: &str = "records";

/// Renders a run result as text
///
/// Strings are printed as they are, tables as TOML and lists as a TOML
/// document with a single `records` key.
pub fn format_result(result: &Value) -> OutputResult<String> {
    match result {
        Value::String(s) => Ok(format!("{}\n", s)),
        Value::Table(table) => Ok(toml::to_string(table)?),
        Value::Array(records) => {
            let mut document = Table::new();
            document.insert(RECORDS_KEY.to_string(), Value::Array(records.clone()));
            Ok(toml::to_string(&document)?)
        }
        other => Ok(format!("{}\n", other)),
    }
}

/// Renders a step list, one step per line
pub fn format_plan(steps: &[Step]) -> String {
    steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let mut line = format!("{:>3}. {}", index + 1, step);
            if step.kind == crate::crawler::StepKind::Visit {
                if let Some(handler) = &step.handler {
                    line.push_str(&format!(" (handler {})", handler));
                }
            }
            if !step.verify {
                line.push_str(" [unverified]");
            }
            line.push('\n');
            line
        })
        .collect()
}

/// Prints notices, errors and a one-line status to stderr
pub fn print_summary(summary: &RunSummary) {
    for notice in &summary.notices {
        eprintln!("notice: {}", notice);
    }
    for (_, message) in &summary.errors {
        eprintln!("error: {}", message);
    }

    eprintln!(
        "{} {}: {} after {} step(s), {} request(s) in {:.2}s",
        summary.portal,
        summary.target,
        summary.state,
        summary.steps_executed,
        summary.visited.len(),
        summary.duration_seconds
    );
}
