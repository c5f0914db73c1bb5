//! Portals defined entirely by a bundle file

use crate::config::{load_bundle, load_bundle_str, BundleFile, ConfigStore};
use crate::crawler::{HandlerRegistry, Session};
use crate::portal::{Action, ActionList, CrawlModule};
use crate::{ConfigError, CrawlError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use toml::{Table, Value};

/// Name used for bundles parsed from text without a `name`
const UNNAMED: &str = "bundle";

/// A portal whose configuration and handlers come from a bundle
#[derive(Debug, Clone)]
pub struct BundlePortal {
    name: String,
    description: String,
    configuration: Table,
    handlers: BTreeMap<String, Arc<ActionList>>,
}

impl BundlePortal {
    /// Loads and validates a bundle file
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_bundle(load_bundle(path)?)
    }

    /// Parses and validates bundle text
    pub fn parse(content: &str) -> Result<Self> {
        Self::from_bundle(load_bundle_str(content)?)
    }

    /// Builds the portal from a validated bundle
    pub fn from_bundle(bundle: BundleFile) -> Result<Self> {
        let name = bundle.name.unwrap_or_else(|| UNNAMED.to_string());

        let mut handlers = BTreeMap::new();
        for (handler, value) in bundle.handler {
            let actions = parse_actions(&handler, value)?;
            for (index, action) in actions.iter().enumerate() {
                action.validate(&bundle.configuration).map_err(|reason| {
                    invalid(format!(
                        "Handler '{}' action {} is invalid: {}",
                        handler,
                        index + 1,
                        reason
                    ))
                })?;
            }
            let list = ActionList {
                name: handler.clone(),
                actions,
            };
            handlers.insert(handler, Arc::new(list));
        }

        tracing::debug!("Bundle '{}' defines {} handler(s)", name, handlers.len());

        Ok(Self {
            name,
            description: bundle.description,
            configuration: bundle.configuration,
            handlers,
        })
    }

    /// Free-form description from the bundle
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Names of the bundle's handlers, sorted
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl CrawlModule for BundlePortal {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_configuration(&self) -> Table {
        self.configuration.clone()
    }

    fn register_handlers(&self, registry: &mut HandlerRegistry) {
        for (name, list) in &self.handlers {
            registry.register_arc(name.clone(), list.clone());
        }
    }

    fn prepare(&self, session: &Session, config: &ConfigStore) -> Result<()> {
        let exempt = config
            .get_as::<Vec<String>>("credentials.exempt_targets")
            .map_err(|e| CrawlError::Plan(e.to_string()))?
            .unwrap_or_default();
        if exempt.iter().any(|target| *target == session.target) {
            return Ok(());
        }

        if session.input("username").is_none() || session.input("password").is_none() {
            return Err(CrawlError::Domain(
                "Missing username or password".to_string(),
            ));
        }
        Ok(())
    }
}

/// A handler is a single action table or a list of them
fn parse_actions(handler: &str, value: Value) -> Result<Vec<Action>> {
    let values = match value {
        Value::Array(values) => values,
        table @ Value::Table(_) => vec![table],
        _ => {
            return Err(invalid(format!(
                "Handler '{}' must be an action table or a list of actions",
                handler
            )))
        }
    };

    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            value.try_into::<Action>().map_err(|e| {
                invalid(format!(
                    "Handler '{}' action {} is malformed: {}",
                    handler,
                    index + 1,
                    e
                ))
            })
        })
        .collect()
}

fn invalid(message: String) -> CrawlError {
    CrawlError::ConfigLoad(ConfigError::Validation(message))
}
