//! Handler registry and resolution
//!
//! Handlers are looked up by name through an explicit registry. Steps and
//! indications each produce an ordered list of candidate names; the first
//! registered candidate runs. A missing handler is not an error: it means
//! there is nothing special to do.

use crate::config::HandlerRef;
use crate::crawler::{RunContext, Step};
use crate::Result;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Candidate name that performs the built-in request of a visit step
pub const VISIT: &str = "visit";

/// A named unit of logic run for a step or a matched indication
pub trait Handler: Send + Sync {
    fn handle(&self, ctx: &mut RunContext<'_>) -> Result<()>;
}

struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut RunContext<'_>) -> Result<()> + Send + Sync,
{
    fn handle(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        (self.0)(ctx)
    }
}

/// What to do with a popped step
#[derive(Clone)]
pub enum Dispatch {
    /// Run a registered handler
    Handler { name: String, handler: Arc<dyn Handler> },
    /// Perform the built-in request
    Visit,
    /// Nothing registered; the step completes without effect
    Skip,
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler { name, .. } => write!(f, "Handler({})", name),
            Self::Visit => write!(f, "Visit"),
            Self::Skip => write!(f, "Skip"),
        }
    }
}

/// Mapping from handler name to handler
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, handler: impl Handler + 'static) {
        self.register_arc(name, Arc::new(handler));
    }

    /// Registers a shared handler under `name`
    pub fn register_arc(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::debug!("Handler '{}' replaced", name);
        }
    }

    /// Registers a function or closure under `name`
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut RunContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.register(name, FnHandler(f));
    }

    /// Returns true if a handler is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Returns the handler registered under `name`
    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the first registered candidate and its handler
    pub fn resolve<S: AsRef<str>>(&self, candidates: &[S]) -> Option<(String, Arc<dyn Handler>)> {
        candidates.iter().find_map(|candidate| {
            let name = candidate.as_ref();
            self.get(name).map(|handler| (name.to_string(), handler))
        })
    }

    /// Decides how a popped step is executed
    ///
    /// Candidates are the step's explicit handler, then its kind. The
    /// `visit` candidate falls back to the built-in request when no handler
    /// of that name is registered.
    pub fn resolve_step(&self, step: &Step) -> Dispatch {
        for candidate in step.candidates() {
            if let Some(handler) = self.get(candidate) {
                return Dispatch::Handler {
                    name: candidate.to_string(),
                    handler,
                };
            }
            if candidate == VISIT {
                return Dispatch::Visit;
            }
        }
        Dispatch::Skip
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

/// Handler candidates for a matched indication
///
/// The configured reference comes first, then `<menu>_<indication>`.
pub fn indication_candidates(
    menu: &str,
    indication: &str,
    reference: Option<&HandlerRef>,
) -> Vec<String> {
    let mut candidates: Vec<String> = reference
        .map(|r| r.candidates().into_iter().map(str::to_string).collect())
        .unwrap_or_default();
    candidates.push(format!("{}_{}", menu, indication));
    candidates
}
