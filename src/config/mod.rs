//! Configuration module for ibank-crawler
//!
//! This module handles:
//! - Portal definition bundles (loading, fingerprinting, validation)
//! - The layered configuration store with persisted overrides
//! - Typed views of configuration sections and per-run settings
//!
//! # Example
//!
//! ```no_run
//! use ibank_crawler::config::{load_bundle, ConfigStore};
//! use std::path::Path;
//!
//! let bundle = load_bundle(Path::new("bundles/example-bank.toml")).unwrap();
//! let store = ConfigStore::new(bundle.configuration);
//! println!("Home page: {:?}", store.get_str("menu.home_page.url"));
//! ```

mod parser;
mod store;
mod types;
mod validation;

// Re-export types
pub use types::{
    BundleFile, HandlerRef, IndicationSpec, MenuDefinition, RunSettings, SessionSettings,
    WindowSettings, COOKIE_FILE, DEFAULT_CONFIGURATION_FILE, DEFAULT_DELAY_SECS, MAX_DELAY_SECS,
};

// Re-export the store
pub use store::{merge_tables, ConfigStore, PersistOutcome, TEMPORARY_KEY};

// Re-export parser functions
pub use parser::{compute_tree_hash, load_bundle, load_bundle_str};
pub use validation::validate_bundle;
