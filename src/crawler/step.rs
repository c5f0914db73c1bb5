//! Planned units of work
//!
//! Steps are plain values: plans in the configuration tree deserialize into
//! them and handlers build them to rewrite the remaining queue.

use serde::{Deserialize, Serialize};
use std::fmt;
use toml::Value;

/// What a step does when it is popped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Request the step's menu and classify the response
    Visit,

    /// Run a handler without a page
    #[default]
    Task,
}

impl StepKind {
    /// Returns the handler candidate name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visit => "visit",
            Self::Task => "task",
        }
    }
}

/// One planned unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "type", default)]
    pub kind: StepKind,

    /// Menu the step targets
    #[serde(default)]
    pub menu: String,

    /// Explicit handler name, tried before the kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,

    /// Classify the response against the menu's indications
    #[serde(default = "default_verify")]
    pub verify: bool,

    /// Handler-specific data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

fn default_verify() -> bool {
    true
}

impl Step {
    /// Creates a visit step for `menu`
    pub fn visit(menu: impl Into<String>) -> Self {
        Self {
            kind: StepKind::Visit,
            menu: menu.into(),
            handler: None,
            verify: true,
            payload: None,
        }
    }

    /// Creates a task step running `handler`
    pub fn task(handler: impl Into<String>) -> Self {
        Self {
            kind: StepKind::Task,
            menu: String::new(),
            handler: Some(handler.into()),
            verify: true,
            payload: None,
        }
    }

    /// Sets the explicit handler
    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    /// Attaches a payload
    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Sets the menu
    pub fn with_menu(mut self, menu: impl Into<String>) -> Self {
        self.menu = menu.into();
        self
    }

    /// Skips classification of the response
    pub fn without_verification(mut self) -> Self {
        self.verify = false;
        self
    }

    /// Handler candidates for this step, in priority order
    pub fn candidates(&self) -> Vec<&str> {
        let mut candidates = Vec::with_capacity(2);
        if let Some(handler) = self.handler.as_deref() {
            candidates.push(handler);
        }
        candidates.push(self.kind.as_str());
        candidates
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.handler.as_deref()) {
            (StepKind::Visit, _) => write!(f, "visit:{}", self.menu),
            (StepKind::Task, Some(handler)) => write!(f, "task:{}", handler),
            (StepKind::Task, None) => write!(f, "task:{}", self.menu),
        }
    }
}
