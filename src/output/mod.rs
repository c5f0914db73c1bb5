//! Output module for run results and summaries
//!
//! This module handles:
//! - Summarizing a run outcome
//! - Rendering results and plans on the console
//! - Writing markdown summaries

mod markdown;
mod report;
mod summary;

pub use markdown::{format_markdown_summary, generate_markdown_summary};
pub use report::{format_plan, format_result, print_summary, RECORDS_KEY};
pub use summary::{OutputError, OutputResult, RunSummary};
