//! Built-in handlers for windowed statement queries
//!
//! A target that lists transactions plans `range_plan` as a task step. It
//! appends one `range_window` step per window and a `range_finish` step;
//! each window prepends the bundle's `reference.range_window` steps, whose
//! handlers collect records into `temporary.range.records`. Page steps those
//! handlers append land behind `range_finish`, so it moves itself to the end
//! of the queue until only it remains. It then sorts the records into the
//! result and queues `range_filter` when a window overshot the range.

use crate::config::{ConfigStore, WindowSettings};
use crate::crawler::{HandlerRegistry, RunContext, Step};
use crate::window::{
    oldest_allowed, parse_date, plan_windows, validate_range, DateRange, RangeRequest, SortOrder,
    RANGE_CURRENT, RANGE_FILTER, RANGE_ORDER, RANGE_ORIGINAL, RANGE_RECORDS,
};
use crate::{CrawlError, Result};
use chrono::NaiveDate;
use toml::Value;

/// Registers `range_plan`, `range_window`, `range_finish` and `range_filter`
pub fn register_window_handlers(registry: &mut HandlerRegistry) {
    registry.register_fn("range_plan", range_plan);
    registry.register_fn("range_window", range_window);
    registry.register_fn("range_finish", range_finish);
    registry.register_fn("range_filter", range_filter);
}

/// Normalizes the range and sort inputs and plans one step per window
pub fn range_plan(ctx: &mut RunContext<'_>) -> Result<()> {
    let settings = window_settings(ctx.config)?;

    let request = RangeRequest::parse(ctx.session.range.as_deref(), ctx.today)?;
    if request.defaulted {
        ctx.notice(format!("No date range given, using today ({})", ctx.today));
    }

    let (order, sort_notice) = SortOrder::normalize(ctx.session.sort.as_deref());
    if let Some(notice) = sort_notice {
        ctx.notice(notice);
    }

    let oldest = oldest_allowed(ctx.today, settings.lookback_months);
    let (range, notices) = validate_range(request.range, oldest, ctx.today);
    for notice in notices {
        ctx.notice(notice);
    }

    ctx.config.set(RANGE_ORIGINAL, range.to_value());
    ctx.config.set(RANGE_ORDER, order.as_str());
    ctx.config.unset(RANGE_RECORDS);

    let windows = plan_windows(&range, settings.max_days, ctx.today, order);
    let needs_filter = windows.iter().any(|window| window.overshoots(&range));
    ctx.config.set(RANGE_FILTER, needs_filter);

    tracing::info!(
        "Planning {} window(s) for {} ({})",
        windows.len(),
        range,
        order.as_str()
    );

    let mut steps: Vec<Step> = windows
        .iter()
        .map(|window| Step::task("range_window").with_payload(window.to_value()))
        .collect();
    steps.push(Step::task("range_finish"));

    ctx.queue.append(steps);
    Ok(())
}

/// Makes the step's window current and runs the window sub-plan
pub fn range_window(ctx: &mut RunContext<'_>) -> Result<()> {
    let window = ctx
        .payload()
        .and_then(DateRange::from_value)
        .ok_or_else(|| CrawlError::Plan(format!("Step {} carries no window", ctx.step)))?;

    tracing::debug!("Visiting window {}", window);
    ctx.config.set(RANGE_CURRENT, window.to_value());

    let steps = ctx.reference("range_window")?;
    ctx.queue.prepend(steps);
    Ok(())
}

/// Sorts the collected records into the result once no other step is pending
pub fn range_finish(ctx: &mut RunContext<'_>) -> Result<()> {
    let pending = ctx
        .queue
        .pending()
        .filter(|step| step.handler.as_deref() != Some("range_finish"))
        .count();
    if pending > 0 {
        tracing::debug!("Deferring range_finish behind {} step(s)", pending);
        ctx.queue.append([ctx.step.clone()]);
        return Ok(());
    }

    let settings = window_settings(ctx.config)?;
    let order = ctx
        .config
        .get_str(RANGE_ORDER)
        .and_then(|s| SortOrder::parse(&s))
        .unwrap_or_default();

    let mut records = match ctx.config.get(RANGE_RECORDS) {
        Some(Value::Array(records)) => records,
        _ => Vec::new(),
    };

    // Undated rows (pending transactions) sort as the newest
    let key = |record: &Value| record_date(record, &settings.date_field).unwrap_or(NaiveDate::MAX);
    match order {
        SortOrder::Ascending => records.sort_by_key(key),
        SortOrder::Descending => records.sort_by(|a, b| key(b).cmp(&key(a))),
    }

    tracing::info!("Collected {} record(s)", records.len());
    ctx.set_result(Value::Array(records));

    if ctx.config.get(RANGE_FILTER).and_then(|v| v.as_bool()) == Some(true) {
        ctx.queue.prepend([Step::task("range_filter")]);
    }
    Ok(())
}

/// Drops result records dated outside the validated range
pub fn range_filter(ctx: &mut RunContext<'_>) -> Result<()> {
    let settings = window_settings(ctx.config)?;
    let original = ctx
        .config
        .get(RANGE_ORIGINAL)
        .as_ref()
        .and_then(DateRange::from_value)
        .ok_or_else(|| CrawlError::Plan("range_filter runs before range_plan".to_string()))?;

    let Some(Value::Array(records)) = ctx.session.result.take() else {
        return Ok(());
    };

    let before = records.len();
    let kept: Vec<Value> = records
        .into_iter()
        .filter(|record| {
            record_date(record, &settings.date_field).map_or(true, |date| original.contains(date))
        })
        .collect();

    tracing::debug!("Filtered {} record(s) outside {}", before - kept.len(), original);
    ctx.set_result(Value::Array(kept));
    Ok(())
}

/// Appends records to the window accumulator; returns the new total
pub fn accumulate_records(config: &mut ConfigStore, records: Vec<Value>) -> usize {
    let mut all = match config.get(RANGE_RECORDS) {
        Some(Value::Array(existing)) => existing,
        _ => Vec::new(),
    };
    all.extend(records);

    let total = all.len();
    config.set(RANGE_RECORDS, Value::Array(all));
    total
}

/// The window being visited
pub fn current_window(config: &ConfigStore) -> Option<DateRange> {
    config.get(RANGE_CURRENT).as_ref().and_then(DateRange::from_value)
}

fn window_settings(config: &ConfigStore) -> Result<WindowSettings> {
    Ok(config
        .get_as::<WindowSettings>("window")
        .map_err(|e| CrawlError::Plan(e.to_string()))?
        .unwrap_or_default())
}

fn record_date(record: &Value, field: &str) -> Option<NaiveDate> {
    record.get(field).and_then(Value::as_str).and_then(parse_date)
}
