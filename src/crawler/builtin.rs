//! Handlers every portal gets
//!
//! - `session_check`: restarts a remote session that has been idle too long
//! - `session_reset`: restarts unconditionally, e.g. on a "session expired" page
//! - `replan`: re-appends the target plan after a restart
//! - the window handlers from [`crate::window`]

use crate::config::SessionSettings;
use crate::crawler::{HandlerRegistry, RunContext, Step};
use crate::window::register_window_handlers;
use crate::{CrawlError, Result};
use chrono::{DateTime, Duration, Utc};

/// Configuration path of the time of the last successful exchange
pub const LAST_VISIT: &str = "session.last_visit";

/// Set once a run has restarted its session
pub const RESTARTED: &str = "temporary.session.restarted";

/// Registers the built-in handlers
pub fn register_builtin_handlers(registry: &mut HandlerRegistry) {
    registry.register_fn("session_check", session_check);
    registry.register_fn("session_reset", session_reset);
    registry.register_fn("replan", replan);
    register_window_handlers(registry);
}

/// Restarts the session when the last visit is too old
///
/// Without a recorded visit there is no session to restart: stale menu
/// overrides are dropped and the plan goes on, leaving the run's one
/// restart for a real expiry. Does nothing once the run has restarted, so a
/// portal that never refreshes `last_visit` cannot loop.
pub fn session_check(ctx: &mut RunContext<'_>) -> Result<()> {
    if already_restarted(ctx) {
        return Ok(());
    }

    let settings = session_settings(ctx)?;
    let last_visit = ctx
        .config
        .get_str(LAST_VISIT)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc));

    match last_visit {
        None => {
            tracing::debug!("No previous visit recorded, starting a new session");
            forget_session(ctx);
            Ok(())
        }
        Some(t) => {
            let idle = Utc::now().signed_duration_since(t);
            let ttl = Duration::seconds(i64::try_from(settings.ttl_secs).unwrap_or(i64::MAX));
            if idle > ttl {
                let reason = format!("idle for {}s, limit is {}s", idle.num_seconds(), settings.ttl_secs);
                restart(ctx, &settings, &reason)
            } else {
                tracing::debug!("Session still fresh ({}s idle)", idle.num_seconds());
                Ok(())
            }
        }
    }
}

/// Restarts the session; a second restart in one run is an error
pub fn session_reset(ctx: &mut RunContext<'_>) -> Result<()> {
    if already_restarted(ctx) {
        return Err(CrawlError::Domain(
            "Session expired again after a restart".to_string(),
        ));
    }

    let settings = session_settings(ctx)?;
    let reason = match ctx.page {
        Some(page) => format!("portal reported an expired session on {}", page.menu),
        None => "restart requested".to_string(),
    };
    restart(ctx, &settings, &reason)
}

/// Appends the steps of the current target
pub fn replan(ctx: &mut RunContext<'_>) -> Result<()> {
    let target = ctx.session.target.clone();
    let steps = ctx.target_plan(&target)?;
    tracing::debug!("Re-planning target '{}' ({} steps)", target, steps.len());
    ctx.queue.append(steps);
    Ok(())
}

fn restart(ctx: &mut RunContext<'_>, settings: &SessionSettings, reason: &str) -> Result<()> {
    tracing::info!("Restarting session: {}", reason);

    forget_session(ctx);
    ctx.config.set(RESTARTED, true);

    let bootstrap = settings
        .bootstrap
        .clone()
        .unwrap_or_else(|| Step::task("replan"));
    ctx.queue.reset(bootstrap);
    Ok(())
}

/// Drops captured menus and the last visit
fn forget_session(ctx: &mut RunContext<'_>) {
    ctx.config.unset("menu");
    ctx.config.unset(LAST_VISIT);
}

fn already_restarted(ctx: &RunContext<'_>) -> bool {
    matches!(ctx.config.get(RESTARTED), Some(toml::Value::Boolean(true)))
}

fn session_settings(ctx: &RunContext<'_>) -> Result<SessionSettings> {
    Ok(ctx
        .config
        .get_as::<SessionSettings>("session")
        .map_err(|e| CrawlError::Plan(e.to_string()))?
        .unwrap_or_default())
}
