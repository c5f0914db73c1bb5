//! Crawl orchestrator - the run loop
//!
//! This module owns one run from planning to teardown:
//! - Seeding the step queue from `target.<name>`
//! - Issuing visits through the transport and consuming one-shot menu
//!   overrides
//! - Classifying responses against the menu's indications
//! - Dispatching handlers and pacing between steps
//! - Persisting the override layer at the end
//!
//! Errors never escape `run`; they are collected in the [`RunOutcome`].

use crate::config::{compute_tree_hash, ConfigStore, HandlerRef, IndicationSpec, MenuDefinition, RunSettings};
use crate::crawler::builtin::{register_builtin_handlers, LAST_VISIT};
use crate::crawler::{
    indication_candidates, Dispatch, Document, Exchange, HandlerRegistry, Page, ReqwestTransport,
    RunContext, Session, Step, StepKind, StepQueue, Transport, DEFAULT_USER_AGENT,
};
use crate::portal::CrawlModule;
use crate::state::RunPhase;
use crate::{CrawlError, Result};
use chrono::{Local, NaiveDate, Utc};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use toml::{Table, Value};

/// Configuration path of the last visited URL, sent as `Referer`
pub const REFERER: &str = "referer";

/// Configuration path of the user agent
pub const USER_AGENT: &str = "user_agent";

/// Configuration path of the fingerprint of the default tree
pub const BUNDLE_HASH: &str = "bundle_hash";

/// What a run produced
#[derive(Debug)]
pub struct RunOutcome {
    pub target: String,

    /// `Stopped` or `Failed`
    pub state: RunPhase,

    pub result: Option<Value>,
    pub errors: Vec<CrawlError>,
    pub notices: Vec<String>,

    /// Steps popped from the queue, in order
    pub executed: Vec<Step>,

    /// Menus requested from the portal, in order
    pub visited: Vec<String>,

    pub elapsed: Duration,
}

impl RunOutcome {
    /// Outcome of a run that could not be set up
    pub fn failed(target: impl Into<String>, error: CrawlError) -> Self {
        Self {
            target: target.into(),
            state: RunPhase::Failed,
            result: None,
            errors: vec![error],
            notices: Vec::new(),
            executed: Vec::new(),
            visited: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Returns true if no error was recorded
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Menus requested from the portal
    pub fn visited_menus(&self) -> Vec<&str> {
        self.visited.iter().map(String::as_str).collect()
    }
}

/// Drives runs of one portal module
pub struct Orchestrator {
    module: Arc<dyn CrawlModule>,
    transport: Box<dyn Transport>,
    registry: HandlerRegistry,
    config: ConfigStore,
    settings: RunSettings,
    today: Option<NaiveDate>,
    phase: RunPhase,
    visited: Vec<String>,
}

impl Orchestrator {
    /// Creates an orchestrator from its parts
    ///
    /// Built-in handlers are registered first so that the module can
    /// replace them.
    pub fn new(
        module: Arc<dyn CrawlModule>,
        config: ConfigStore,
        transport: Box<dyn Transport>,
        settings: RunSettings,
    ) -> Self {
        let mut registry = HandlerRegistry::new();
        register_builtin_handlers(&mut registry);
        module.register_handlers(&mut registry);

        Self {
            module,
            transport,
            registry,
            config,
            settings,
            today: None,
            phase: RunPhase::Idle,
            visited: Vec::new(),
        }
    }

    /// Opens the persisted configuration and builds an HTTP transport whose
    /// cookie jar lives in the working directory
    ///
    /// # Arguments
    ///
    /// * `module` - The portal to crawl
    /// * `settings` - Working directory, pacing and debug settings
    ///
    /// # Returns
    ///
    /// * `Ok(Orchestrator)` - Ready to run
    /// * `Err(CrawlError)` - The persisted configuration could not be loaded
    pub fn open(module: Arc<dyn CrawlModule>, settings: RunSettings) -> Result<Self> {
        let path = settings.configuration_path();
        let mut config = ConfigStore::open(module.default_configuration(), &path)?;

        check_bundle_drift(&mut config)?;
        let user_agent = resolve_user_agent(&mut config, &settings);

        let transport = ReqwestTransport::with_cookie_file(&user_agent, settings.cookie_path())
            .map_err(|e| CrawlError::Transport {
                url: String::new(),
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self::new(module, config, Box::new(transport), settings))
    }

    /// Fixes the date the run treats as today
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// The handler registry, for registering extra handlers
    pub fn registry_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigStore {
        &mut self.config
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Phase of the current or last run
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Steps a run for `session.target` would start with
    pub fn plan(&self, session: &Session) -> Result<Vec<Step>> {
        if session.target.trim().is_empty() {
            return Err(CrawlError::Plan("No target given".to_string()));
        }

        let path = format!("target.{}", session.target);
        let steps = self
            .config
            .get_as::<Vec<Step>>(&path)
            .map_err(|e| CrawlError::Plan(e.to_string()))?
            .unwrap_or_default();

        if steps.is_empty() {
            return Err(CrawlError::Plan(format!(
                "Target '{}' is not defined for portal '{}'",
                session.target,
                self.module.name()
            )));
        }
        Ok(steps)
    }

    /// Runs `session.target` to completion
    pub async fn run(&mut self, mut session: Session) -> RunOutcome {
        let start_time = Instant::now();
        let today = self.today.unwrap_or_else(|| Local::now().date_naive());
        let mut executed = Vec::new();

        self.phase = RunPhase::Idle;
        self.visited.clear();
        tracing::info!(
            "Starting {} run for target '{}'",
            self.module.name(),
            session.target
        );

        self.transition(RunPhase::Planning);
        let planned = self
            .plan(&session)
            .and_then(|steps| self.module.prepare(&session, &self.config).map(|_| steps));

        match planned {
            Ok(steps) => {
                tracing::debug!("Planned {} step(s)", steps.len());
                let mut queue = StepQueue::from_steps(steps);
                self.transition(RunPhase::Running);
                self.run_loop(&mut session, &mut queue, &mut executed, today)
                    .await;
            }
            Err(e) => session.record_error(e),
        }

        let outcome_phase = outcome_phase(&session.errors);
        self.transition(outcome_phase);
        self.teardown(&mut session);

        let state = outcome_phase_after_teardown(outcome_phase, &session.errors);
        let elapsed = start_time.elapsed();
        tracing::info!(
            "Run of '{}' {} after {} step(s) in {:.2}s",
            session.target,
            state,
            executed.len(),
            elapsed.as_secs_f64()
        );

        RunOutcome {
            target: session.target,
            state,
            result: session.result,
            errors: session.errors,
            notices: session.notices,
            executed,
            visited: std::mem::take(&mut self.visited),
            elapsed,
        }
    }

    async fn run_loop(
        &mut self,
        session: &mut Session,
        queue: &mut StepQueue,
        executed: &mut Vec<Step>,
        today: NaiveDate,
    ) {
        while !session.stop {
            let Some(step) = queue.pop() else {
                tracing::debug!("Plan exhausted");
                break;
            };

            tracing::debug!("Step {} ({} pending)", step, queue.len());
            executed.push(step.clone());

            if let Err(e) = self.execute_step(&step, session, queue, today).await {
                session.record_error(e);
                break;
            }

            if !session.stop && !queue.is_empty() {
                let delay = self.settings.pacing_delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn execute_step(
        &mut self,
        step: &Step,
        session: &mut Session,
        queue: &mut StepQueue,
        today: NaiveDate,
    ) -> Result<()> {
        match self.registry.resolve_step(step) {
            Dispatch::Visit => self.visit(step, session, queue, today).await,
            Dispatch::Handler { name, handler } => {
                tracing::debug!("Running handler '{}' for {}", name, step);
                let mut ctx = RunContext {
                    session,
                    queue,
                    config: &mut self.config,
                    step,
                    page: None,
                    today,
                };
                handler.handle(&mut ctx)
            }
            Dispatch::Skip => {
                if step.kind == StepKind::Task {
                    tracing::debug!("No handler registered for {}", step);
                }
                Ok(())
            }
        }
    }

    /// Requests the step's menu, classifies the response and dispatches
    async fn visit(
        &mut self,
        step: &Step,
        session: &mut Session,
        queue: &mut StepQueue,
        today: NaiveDate,
    ) -> Result<()> {
        let menu_path = format!("menu.{}", step.menu);
        let menu = self
            .config
            .get_as::<MenuDefinition>(&menu_path)
            .map_err(|e| CrawlError::Plan(e.to_string()))?
            .ok_or_else(|| CrawlError::Plan(format!("Unknown menu '{}'", step.menu)))?;
        let url = menu
            .url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| CrawlError::Plan(format!("Menu '{}' has no URL", step.menu)))?;

        self.transport.reset();
        self.transport.set_url(&url);
        for (name, value) in &menu.headers {
            self.transport.set_header(name, value);
        }
        if let Some(referer) = menu.referer.clone().or_else(|| self.config.get_str(REFERER)) {
            self.transport.set_header("Referer", &referer);
        }
        let method = match menu.fields.clone() {
            Some(fields) => {
                self.transport.post_fields(fields);
                "POST"
            }
            None => "GET",
        };

        // Overrides are one-shot
        self.config.unset(&format!("{}.url", menu_path));
        self.config.unset(&format!("{}.fields", menu_path));

        tracing::debug!("{} {} ({})", method, url, step.menu);
        self.visited.push(step.menu.clone());
        let exchange = self.transport.execute().await;
        self.capture(&step.menu, method, &url, &exchange);

        if let Some(message) = exchange.error {
            return Err(CrawlError::Transport { url, message });
        }

        let final_url = exchange.final_url.unwrap_or(url);
        self.config.set(LAST_VISIT, Utc::now().to_rfc3339());
        self.config.set(REFERER, final_url.clone());

        let mut page = Page {
            menu: step.menu.clone(),
            indication: None,
            url: final_url,
            status: exchange.status,
            document: Document::parse(&exchange.body),
        };

        if !step.verify || menu.indication.is_empty() {
            return Ok(());
        }
        if exchange.body.trim().is_empty() {
            return Err(CrawlError::Verification {
                menu: step.menu.clone(),
                detail: "empty response".to_string(),
            });
        }

        let (indication, reference) = self
            .classify(&page.document, &menu.indication)?
            .ok_or_else(|| CrawlError::Verification {
                menu: step.menu.clone(),
                detail: "no indication matched".to_string(),
            })?;
        tracing::debug!("Menu '{}' matched indication '{}'", step.menu, indication);

        let candidates = indication_candidates(&step.menu, &indication, reference.as_ref());
        page.indication = Some(indication);

        match self.registry.resolve(&candidates) {
            Some((name, handler)) => {
                tracing::debug!("Dispatching '{}'", name);
                let mut ctx = RunContext {
                    session,
                    queue,
                    config: &mut self.config,
                    step,
                    page: Some(&page),
                    today,
                };
                handler.handle(&mut ctx)
            }
            None => {
                tracing::debug!("No handler among {:?}", candidates);
                Ok(())
            }
        }
    }

    /// First indication of the menu the document matches
    fn classify(
        &self,
        document: &Document,
        indications: &Table,
    ) -> Result<Option<(String, Option<HandlerRef>)>> {
        for (name, reference) in indications {
            let spec = self
                .config
                .get_as::<IndicationSpec>(&format!("indication.{}", name))
                .map_err(|e| CrawlError::Plan(e.to_string()))?
                .ok_or_else(|| CrawlError::Plan(format!("Indication '{}' is not defined", name)))?;

            if document.matches(&spec) {
                let reference = match reference {
                    Value::String(s) if s.is_empty() => None,
                    other => Some(other.clone().try_into::<HandlerRef>().map_err(|_| {
                        CrawlError::Plan(format!("Indication '{}' has a malformed handler reference", name))
                    })?),
                };
                return Ok(Some((name.clone(), reference)));
            }
        }
        Ok(None)
    }

    /// Appends the exchange to the debug history
    fn capture(&self, menu: &str, method: &str, url: &str, exchange: &Exchange) {
        if !self.settings.debug {
            return;
        }

        let dir = self.settings.working_dir.join("debug");
        let written = std::fs::create_dir_all(&dir)
            .and_then(|_| {
                let mut history = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(dir.join("history.log"))?;
                writeln!(
                    history,
                    "{} {} {} {} -> {} {}",
                    Utc::now().to_rfc3339(),
                    menu,
                    method,
                    url,
                    exchange
                        .status
                        .map_or_else(|| "-".to_string(), |s| s.to_string()),
                    exchange.error.as_deref().unwrap_or("ok")
                )
            })
            .and_then(|_| std::fs::write(dir.join("response_body.html"), &exchange.body));

        if let Err(e) = written {
            tracing::warn!("Failed to write debug capture to {}: {}", dir.display(), e);
        }
    }

    /// Clears temporary state and persists the override layer and cookies
    fn teardown(&mut self, session: &mut Session) {
        self.transition(RunPhase::Teardown);
        self.config.clear_temporary();
        drop_pending_fields(&mut self.config);

        // A lost jar only costs a fresh login next time
        if let Err(e) = self.transport.save_cookies() {
            tracing::warn!("Failed to save cookies: {}", e);
        }

        match self.config.persist() {
            Ok(outcome) => tracing::debug!("Configuration persistence: {:?}", outcome),
            Err(e) => {
                session.record_error(CrawlError::ConfigLoad(e));
                self.transition(RunPhase::Failed);
            }
        }
    }

    fn transition(&mut self, next: RunPhase) {
        if self.phase.can_transition_to(next) {
            tracing::debug!("Run phase {} -> {}", self.phase, next);
        } else {
            tracing::warn!("Unexpected run phase change {} -> {}", self.phase, next);
        }
        self.phase = next;
    }
}

/// Opens `module` with `settings` and runs `session`
///
/// Setup failures are reported in the outcome like any other error.
pub async fn run_target(
    module: Arc<dyn CrawlModule>,
    settings: RunSettings,
    session: Session,
) -> RunOutcome {
    match Orchestrator::open(module, settings) {
        Ok(mut orchestrator) => orchestrator.run(session).await,
        Err(e) => {
            tracing::error!("{}", e);
            RunOutcome::failed(session.target, e)
        }
    }
}

/// Engine and plan faults fail the run; anything else stops it
fn outcome_phase(errors: &[CrawlError]) -> RunPhase {
    if errors.iter().any(CrawlError::is_engine_fault) {
        RunPhase::Failed
    } else {
        RunPhase::Stopped
    }
}

fn outcome_phase_after_teardown(before: RunPhase, errors: &[CrawlError]) -> RunPhase {
    match outcome_phase(errors) {
        RunPhase::Failed => RunPhase::Failed,
        _ => before,
    }
}

/// Drops menu overrides captured for an older version of the defaults
fn check_bundle_drift(config: &mut ConfigStore) -> Result<()> {
    let hash = compute_tree_hash(config.defaults())?;
    let previous = config
        .custom()
        .get(BUNDLE_HASH)
        .and_then(Value::as_str)
        .map(str::to_string);

    match previous {
        Some(previous) if previous == hash => return Ok(()),
        Some(_) => {
            tracing::warn!("Portal definition changed since the last run, dropping captured menus");
            config.unset("menu");
        }
        None => {}
    }
    config.set(BUNDLE_HASH, hash);
    Ok(())
}

/// User agent from the configuration, else from the settings, persisted
fn resolve_user_agent(config: &mut ConfigStore, settings: &RunSettings) -> String {
    if let Some(agent) = config.get_str(USER_AGENT) {
        return agent;
    }

    let agent = settings
        .user_agent
        .clone()
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
    config.set(USER_AGENT, agent.clone());
    agent
}

/// Pending form fields may carry credentials; they never reach the disk
fn drop_pending_fields(config: &mut ConfigStore) {
    let pending: Vec<String> = match config.custom().get("menu").and_then(Value::as_table) {
        Some(menus) => menus
            .iter()
            .filter(|(_, menu)| menu.get("fields").is_some())
            .map(|(name, _)| name.clone())
            .collect(),
        None => return,
    };

    for name in pending {
        tracing::debug!("Discarding unsent fields of menu '{}'", name);
        config.unset(&format!("menu.{}.fields", name));
    }
}
