//! State module for tracking run progress
//!
//! # Components
//!
//! - `RunPhase`: The phase a crawl run is in (planning, running, outcome, teardown)

mod run_phase;

// Re-export main types
pub use run_phase::RunPhase;
