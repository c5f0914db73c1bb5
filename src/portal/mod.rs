//! Portal modules
//!
//! A portal module supplies everything site-specific: the default
//! configuration tree, the handlers, and input checks. The engine never
//! looks modules up by naming convention; callers register them in a
//! [`PortalRegistry`] explicitly.

mod actions;
mod bundle;

pub use actions::{Action, ActionList};
pub use bundle::BundlePortal;

use crate::config::ConfigStore;
use crate::crawler::{HandlerRegistry, Session};
use crate::{CrawlError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use toml::Table;

/// Site-specific half of a crawl
pub trait CrawlModule: Send + Sync {
    /// Short identifier, e.g. `example-bank`
    fn name(&self) -> &str;

    /// Default configuration tree: menus, indications, plans and limits
    fn default_configuration(&self) -> Table;

    /// Directory for persisted overrides when the caller names none
    fn default_working_dir(&self) -> PathBuf {
        Path::new(".ibank").join(self.name())
    }

    /// Adds the module's handlers; they replace built-ins of the same name
    fn register_handlers(&self, _registry: &mut HandlerRegistry) {}

    /// Applies one caller input to the session
    fn set(&self, session: &mut Session, key: &str, value: &str) {
        session.set(key, value);
    }

    /// Checks the session before anything is fetched
    fn prepare(&self, _session: &Session, _config: &ConfigStore) -> Result<()> {
        Ok(())
    }
}

/// Builds a fresh module instance
pub type ModuleFactory = Box<dyn Fn() -> Result<Arc<dyn CrawlModule>> + Send + Sync>;

/// Name to module factory
#[derive(Default)]
pub struct PortalRegistry {
    factories: BTreeMap<String, ModuleFactory>,
}

impl PortalRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `name`, replacing any previous one
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn CrawlModule>> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Box::new(factory)).is_some() {
            tracing::warn!("Portal '{}' registered twice, keeping the last one", name);
        }
    }

    /// Registers an already-built module
    pub fn register_module(&mut self, module: Arc<dyn CrawlModule>) {
        let name = module.name().to_string();
        self.register(name, move || Ok(Arc::clone(&module)));
    }

    /// Loads a bundle file and registers it under its portal name
    pub fn register_bundle(&mut self, path: &Path) -> Result<String> {
        let portal = BundlePortal::load(path)?;
        let name = portal.name().to_string();
        tracing::debug!("Registered bundle {} as '{}'", path.display(), name);
        self.register_module(Arc::new(portal));
        Ok(name)
    }

    /// Returns true if `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Builds the module registered under `name`
    pub fn create(&self, name: &str) -> Result<Arc<dyn CrawlModule>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            CrawlError::Plan(format!(
                "Unknown portal '{}' (registered: {})",
                name,
                self.names().join(", ")
            ))
        })?;
        factory()
    }
}

impl fmt::Debug for PortalRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalRegistry")
            .field("portals", &self.names())
            .finish()
    }
}
