//! Crawl engine
//!
//! This module contains the core crawling logic, including:
//! - Steps and the mutable step queue
//! - Handler registration and resolution
//! - HTTP transport and HTML document queries
//! - The run loop that ties them together

mod builtin;
mod context;
mod dispatcher;
mod fetcher;
mod orchestrator;
mod parser;
mod queue;
mod step;

pub use builtin::{register_builtin_handlers, session_check, session_reset, LAST_VISIT, RESTARTED};
pub use context::{Credentials, RunContext, Session};
pub use dispatcher::{indication_candidates, Dispatch, Handler, HandlerRegistry, VISIT};
pub use fetcher::{
    build_http_client, load_cookie_jar, Exchange, ReqwestTransport, Transport, DEFAULT_USER_AGENT,
};
pub use orchestrator::{run_target, Orchestrator, RunOutcome, BUNDLE_HASH, REFERER, USER_AGENT};
pub use parser::{normalize_whitespace, resolve_link, Document, Form, FormChoice, Locator, Page};
pub use queue::StepQueue;
pub use step::{Step, StepKind};
