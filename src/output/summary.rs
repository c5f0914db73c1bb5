//! Run summary types
//!
//! This module defines the summary of one run as shown to the caller and
//! the errors raised while writing it.

use crate::crawler::RunOutcome;
use crate::state::RunPhase;
use crate::ErrorCategory;
use std::collections::BTreeMap;
use thiserror::Error;
use toml::Value;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to format output: {0}")]
    Format(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Everything worth reporting about one run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Portal name
    pub portal: String,

    /// Requested target
    pub target: String,

    /// `Stopped` or `Failed`
    pub state: RunPhase,

    /// Steps popped from the queue
    pub steps_executed: usize,

    /// Menus requested, in order
    pub visited: Vec<String>,

    /// Number of records, or 1 for a scalar or table result
    pub result_size: Option<usize>,

    /// Error messages in the order they happened
    pub errors: Vec<(ErrorCategory, String)>,

    /// Corrections made to the caller's inputs
    pub notices: Vec<String>,

    pub duration_seconds: f64,
}

impl RunSummary {
    /// Builds the summary of `outcome`
    pub fn from_outcome(portal: impl Into<String>, outcome: &RunOutcome) -> Self {
        Self {
            portal: portal.into(),
            target: outcome.target.clone(),
            state: outcome.state,
            steps_executed: outcome.executed.len(),
            visited: outcome.visited.clone(),
            result_size: outcome.result.as_ref().map(|result| match result {
                Value::Array(records) => records.len(),
                _ => 1,
            }),
            errors: outcome
                .errors
                .iter()
                .map(|e| (e.category(), e.to_string()))
                .collect(),
            notices: outcome.notices.clone(),
            duration_seconds: outcome.elapsed.as_secs_f64(),
        }
    }

    /// Returns true if the run recorded no error
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of errors per category
    pub fn error_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for (category, _) in &self.errors {
            *counts.entry(format!("{:?}", category)).or_insert(0) += 1;
        }
        counts
    }
}
