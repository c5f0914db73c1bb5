//! Step queue for a single run
//!
//! The queue is the remaining plan. Handlers rewrite it while the run is in
//! progress:
//! - `prepend` runs a sub-plan before everything pending (e.g. login first)
//! - `append` continues after everything pending (e.g. the next window)
//! - `reset` throws the plan away and restarts from one bootstrap step

use crate::crawler::Step;
use std::collections::VecDeque;

/// Ordered list of pending steps
#[derive(Debug, Clone, Default)]
pub struct StepQueue {
    steps: VecDeque<Step>,
}

impl StepQueue {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue holding `steps` in order
    pub fn from_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    /// Inserts `steps` before all pending steps, keeping their order
    pub fn prepend(&mut self, steps: impl IntoIterator<Item = Step>) {
        let steps: Vec<Step> = steps.into_iter().collect();
        for step in steps.into_iter().rev() {
            self.steps.push_front(step);
        }
    }

    /// Inserts `steps` after all pending steps
    pub fn append(&mut self, steps: impl IntoIterator<Item = Step>) {
        self.steps.extend(steps);
    }

    /// Discards the pending plan and substitutes `step`
    pub fn reset(&mut self, step: Step) {
        tracing::debug!("Discarding {} pending step(s), restarting at {}", self.steps.len(), step);
        self.steps.clear();
        self.steps.push_back(step);
    }

    /// Removes and returns the next step
    pub fn pop(&mut self) -> Option<Step> {
        self.steps.pop_front()
    }

    /// Returns the next step without removing it
    pub fn peek(&self) -> Option<&Step> {
        self.steps.front()
    }

    /// Returns the number of pending steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if no step is pending
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Iterates over pending steps in execution order
    pub fn pending(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }
}
