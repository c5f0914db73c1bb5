//! Markdown summary generation
//!
//! This module generates human-readable markdown summaries of runs,
//! including the visited menus, notices and errors.

use crate::output::summary::{OutputResult, RunSummary};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes a markdown summary of a run
///
/// # Arguments
///
/// * `summary` - The run summary
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote markdown summary
/// * `Err(OutputError)` - Failed to write summary
pub fn generate_markdown_summary(summary: &RunSummary, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_summary(summary);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a run summary as markdown
pub fn format_markdown_summary(summary: &RunSummary) -> String {
    let mut md = String::new();

    md.push_str(&format!(
        "# {} / {}\n\n",
        summary.portal, summary.target
    ));

    // Run metadata
    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **State**: {}\n", summary.state));
    md.push_str(&format!(
        "- **Duration**: {:.2} seconds\n",
        summary.duration_seconds
    ));
    md.push_str(&format!(
        "- **Steps Executed**: {}\n",
        summary.steps_executed
    ));
    match summary.result_size {
        Some(size) => md.push_str(&format!("- **Result Entries**: {}\n\n", size)),
        None => md.push_str("- **Result**: none\n\n"),
    }

    if !summary.visited.is_empty() {
        md.push_str("## Visited Menus\n\n");
        for (index, menu) in summary.visited.iter().enumerate() {
            md.push_str(&format!("{}. {}\n", index + 1, menu));
        }
        md.push('\n');
    }

    if !summary.notices.is_empty() {
        md.push_str("## Notices\n\n");
        for notice in &summary.notices {
            md.push_str(&format!("- {}\n", notice));
        }
        md.push('\n');
    }

    if !summary.errors.is_empty() {
        md.push_str("## Errors\n\n");
        md.push_str("| Category | Message |\n");
        md.push_str("|----------|---------|\n");
        for (category, message) in &summary.errors {
            md.push_str(&format!(
                "| {:?} | {} |\n",
                category,
                message.replace('|', "\\|")
            ));
        }
        md.push('\n');
    }

    md
}
