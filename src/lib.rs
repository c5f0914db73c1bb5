//! ibank-crawler: a stateful crawl engine for internet-banking portals
//!
//! This crate drives multi-step authenticated sessions against portals that
//! only expose balances and statements through sequences of HTML pages and
//! forms. A portal is described by a definition bundle (menus, page
//! indications, target plans); the engine walks the plan, classifies each
//! fetched page, dispatches handlers, and persists session overrides between
//! runs.

pub mod config;
pub mod crawler;
pub mod output;
pub mod portal;
pub mod state;
pub mod window;

use thiserror::Error;

/// Main error type for crawl runs
///
/// Every variant is fatal for the run it occurs in. The orchestrator records
/// them in [`crawler::RunOutcome::errors`] instead of returning them.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] ConfigError),

    #[error("Plan error: {0}")]
    Plan(String),

    #[error("Verification of menu \"{menu}\" failed, the layout may have changed: {detail}")]
    Verification { menu: String, detail: String },

    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("{0}")]
    Domain(String),
}

/// Coarse classification of a [`CrawlError`], used by callers to decide how
/// to log or alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    ConfigLoad,
    Plan,
    Verification,
    Transport,
    Domain,
}

impl CrawlError {
    /// Returns the category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigLoad(_) => ErrorCategory::ConfigLoad,
            Self::Plan(_) => ErrorCategory::Plan,
            Self::Verification { .. } => ErrorCategory::Verification,
            Self::Transport { .. } => ErrorCategory::Transport,
            Self::Domain(_) => ErrorCategory::Domain,
        }
    }

    /// Returns true if the error means the engine or the definition bundle
    /// is broken, rather than the remote site or the caller's inputs
    pub fn is_engine_fault(&self) -> bool {
        matches!(self, Self::ConfigLoad(_) | Self::Plan(_))
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unexpected value at \"{path}\": {message}")]
    Shape { path: String, message: String },
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{ConfigStore, RunSettings};
pub use crawler::{Orchestrator, RunContext, RunOutcome, Session, Step};
pub use portal::{BundlePortal, CrawlModule, PortalRegistry};
pub use state::RunPhase;
