/// Run phase definitions for the crawl orchestrator
///
/// A run moves `Idle -> Planning -> Running`, ends in one of the outcome
/// phases and then passes through `Teardown`, where the configuration is
/// persisted.
use std::fmt;

/// Represents the current phase of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    // ===== Active Phases =====
    /// Orchestrator constructed, nothing executed yet
    Idle,

    /// Validating inputs and seeding the step queue
    Planning,

    /// Executing steps
    Running,

    // ===== Outcome Phases =====
    /// The queue drained or the stop flag was set
    Stopped,

    /// An unrecoverable error: the plan or the engine itself is broken
    Failed,

    // ===== Special Phases =====
    /// Persisting configuration after an outcome was reached
    Teardown,
}

impl RunPhase {
    /// Returns true if this phase is an outcome of the run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Returns true if steps may still be planned or executed
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Planning | Self::Running)
    }

    /// Returns true if the phase is a failure of the engine or plan
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Returns true if moving from this phase to `next` is allowed
    ///
    /// `Teardown` may only fall back to `Failed`, which happens when the
    /// configuration cannot be persisted.
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;

        matches!(
            (self, next),
            (Idle, Planning)
                | (Planning, Running)
                | (Planning, Stopped)
                | (Planning, Failed)
                | (Running, Stopped)
                | (Running, Failed)
                | (Stopped, Teardown)
                | (Failed, Teardown)
                | (Teardown, Failed)
        )
    }

    /// Returns the lowercase name of the phase
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Teardown => "teardown",
        }
    }

    /// Returns all phases
    pub fn all_phases() -> Vec<Self> {
        vec![
            Self::Idle,
            Self::Planning,
            Self::Running,
            Self::Stopped,
            Self::Failed,
            Self::Teardown,
        ]
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
