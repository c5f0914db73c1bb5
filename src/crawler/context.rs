//! Session state and the context handed to handlers

use crate::config::ConfigStore;
use crate::crawler::{Document, Page, Step, StepQueue};
use crate::{CrawlError, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;
use toml::Value;

/// Login credentials supplied by the caller
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub account: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("account", &self.account)
            .finish()
    }
}

/// Inputs and outputs of one run
#[derive(Debug, Default)]
pub struct Session {
    /// Requested operation, e.g. `get_balance`
    pub target: String,

    pub credentials: Credentials,

    /// Raw date range input
    pub range: Option<String>,

    /// Raw sort order input
    pub sort: Option<String>,

    /// Output of the target
    pub result: Option<Value>,

    /// Errors in the order they happened
    pub errors: Vec<CrawlError>,

    /// Corrections made to the caller's inputs
    pub notices: Vec<String>,

    /// Set once; the run ends at the next loop check
    pub stop: bool,

    /// Any other caller input
    pub extra: BTreeMap<String, String>,
}

impl Session {
    /// Creates a session for `target`
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Sets username and password
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials.username = Some(username.into());
        self.credentials.password = Some(password.into());
        self
    }

    /// Sets the date range input
    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = Some(range.into());
        self
    }

    /// Sets the sort order input
    pub fn with_sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    /// Sets a named input
    ///
    /// Known names fill the typed fields; anything else lands in `extra`.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match key {
            "target" => self.target = value,
            "username" => self.credentials.username = Some(value),
            "password" => self.credentials.password = Some(value),
            "account" => self.credentials.account = Some(value),
            "range" => self.range = Some(value),
            "sort" => self.sort = Some(value),
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
    }

    /// Returns a named input, if it is set and non-empty
    pub fn input(&self, key: &str) -> Option<&str> {
        let value = match key {
            "target" => Some(self.target.as_str()),
            "username" => self.credentials.username.as_deref(),
            "password" => self.credentials.password.as_deref(),
            "account" => self.credentials.account.as_deref(),
            "range" => self.range.as_deref(),
            "sort" => self.sort.as_deref(),
            _ => self.extra.get(key).map(String::as_str),
        };
        value.filter(|v| !v.is_empty())
    }

    /// Records a fatal error and requests a stop
    pub fn record_error(&mut self, error: CrawlError) {
        match error.category() {
            crate::ErrorCategory::Plan | crate::ErrorCategory::ConfigLoad => {
                tracing::error!("{}", error)
            }
            _ => tracing::warn!("{}", error),
        }
        self.errors.push(error);
        self.stop = true;
    }

    /// Records a correction of the caller's inputs
    pub fn notice(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("Notice: {}", message);
        self.notices.push(message);
    }
}

/// Everything a handler may read or change
pub struct RunContext<'a> {
    pub session: &'a mut Session,
    pub queue: &'a mut StepQueue,
    pub config: &'a mut ConfigStore,

    /// Step being executed
    pub step: &'a Step,

    /// Page of the visit, absent for task steps
    pub page: Option<&'a Page>,

    /// Calendar date the run treats as today
    pub today: NaiveDate,
}

impl<'a> RunContext<'a> {
    /// The visited page
    pub fn page(&self) -> Result<&'a Page> {
        self.page
            .ok_or_else(|| CrawlError::Plan(format!("Step {} has no page to inspect", self.step)))
    }

    /// The document of the visited page
    pub fn document(&self) -> Result<&'a Document> {
        Ok(&self.page()?.document)
    }

    /// Menu of the current step
    pub fn menu(&self) -> &'a str {
        &self.step.menu
    }

    /// Payload of the current step
    pub fn payload(&self) -> Option<&'a Value> {
        self.step.payload.as_ref()
    }

    /// Resolves a link against the visited page, or accepts an absolute URL
    pub fn resolve_url(&self, href: &str) -> Option<String> {
        match self.page {
            Some(page) => page.resolve_url(href),
            None => url::Url::parse(href.trim())
                .ok()
                .filter(|u| matches!(u.scheme(), "http" | "https"))
                .map(|u| u.to_string()),
        }
    }

    /// Assigns the run's output
    pub fn set_result(&mut self, value: impl Into<Value>) {
        self.session.result = Some(value.into());
    }

    /// Records a correction of the caller's inputs
    pub fn notice(&mut self, message: impl Into<String>) {
        self.session.notice(message);
    }

    /// Requests the run to end after this step
    pub fn stop(&mut self) {
        self.session.stop = true;
    }

    /// Builds a business-rule failure
    pub fn fail(&self, message: impl Into<String>) -> CrawlError {
        CrawlError::Domain(message.into())
    }

    /// Builds a verification failure for the current menu
    pub fn verification(&self, detail: impl Into<String>) -> CrawlError {
        CrawlError::Verification {
            menu: self.step.menu.clone(),
            detail: detail.into(),
        }
    }

    /// Steps of `reference.<name>`
    pub fn reference(&self, name: &str) -> Result<Vec<Step>> {
        self.steps_at(&format!("reference.{}", name))
    }

    /// Steps of `target.<name>`
    pub fn target_plan(&self, name: &str) -> Result<Vec<Step>> {
        self.steps_at(&format!("target.{}", name))
    }

    fn steps_at(&self, path: &str) -> Result<Vec<Step>> {
        self.config
            .get_as::<Vec<Step>>(path)
            .map_err(|e| CrawlError::Plan(e.to_string()))?
            .ok_or_else(|| CrawlError::Plan(format!("No step list defined at '{}'", path)))
    }
}
