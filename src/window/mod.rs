//! Date-window planning
//!
//! Portals limit how far back history goes and how many days a single
//! statement query may span. This module handles:
//! - Parsing and normalizing the caller's range and sort inputs
//! - Clamping a range into `[oldest allowed, today]` with notices
//! - Splitting an over-long range into calendar-month windows no longer
//!   than the portal's window limit
//! - Inferring full dates from year-less statement columns
//!
//! The handlers driving these steps live in [`handlers`].

pub mod handlers;

use crate::{CrawlError, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{Datelike, Duration, Months, NaiveDate};
use std::fmt;
use toml::{Table, Value};

pub use handlers::{
    accumulate_records, current_window, range_filter, range_finish, range_plan, range_window,
    register_window_handlers,
};

/// Configuration path of the range after validation, before splitting
pub const RANGE_ORIGINAL: &str = "temporary.range.original";

/// Configuration path of the window being visited
pub const RANGE_CURRENT: &str = "temporary.range.current";

/// Configuration path of the records collected so far
pub const RANGE_RECORDS: &str = "temporary.range.records";

/// Configuration path of the flag asking for `range_filter`
pub const RANGE_FILTER: &str = "temporary.range.filter";

/// Configuration path of the normalized sort order
pub const RANGE_ORDER: &str = "temporary.range.order";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive range of calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Creates a range; `None` if `start` is after `end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// A range of one day
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Returns true if `date` lies within the range
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of days, both ends included
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Days shared with `other`
    pub fn intersect(&self, other: &DateRange) -> Option<DateRange> {
        DateRange::new(self.start.max(other.start), self.end.min(other.end))
    }

    /// Returns true if this range reaches beyond `other` on either side
    pub fn overshoots(&self, other: &DateRange) -> bool {
        self.start < other.start || self.end > other.end
    }

    /// Consecutive pieces of at most `max_days` days, oldest first
    pub fn chunks(&self, max_days: u32) -> Vec<DateRange> {
        let step = Duration::days(i64::from(max_days.max(1)) - 1);
        let mut pieces = Vec::new();
        let mut cursor = self.start;

        loop {
            let end = cursor
                .checked_add_signed(step)
                .map_or(self.end, |end| end.min(self.end));
            pieces.push(DateRange { start: cursor, end });
            match end.succ_opt() {
                Some(next) if end < self.end => cursor = next,
                _ => break,
            }
        }
        pieces
    }

    /// `{ start, end }` table with ISO dates
    pub fn to_value(&self) -> Value {
        let mut table = Table::new();
        table.insert("start".to_string(), Value::from(self.start.format(DATE_FORMAT).to_string()));
        table.insert("end".to_string(), Value::from(self.end.format(DATE_FORMAT).to_string()));
        Value::Table(table)
    }

    /// Reads a `{ start, end }` table
    pub fn from_value(value: &Value) -> Option<Self> {
        let start = parse_iso(value.get("start")?.as_str()?)?;
        let end = parse_iso(value.get("end")?.as_str()?)?;
        DateRange::new(start, end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

/// The caller's range after parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub range: DateRange,

    /// True when no range was given and today was assumed
    pub defaulted: bool,
}

impl RangeRequest {
    /// Parses a range input
    ///
    /// Accepted forms: `today`, `yesterday`, `YYYY-MM-DD`,
    /// `YYYY-MM-DD..YYYY-MM-DD` and `YYYY-MM-DD ~ YYYY-MM-DD`. Either side
    /// of a pair may also be `today` or `yesterday`.
    pub fn parse(input: Option<&str>, today: NaiveDate) -> Result<Self> {
        let input = input.map(str::trim).filter(|s| !s.is_empty());
        let Some(input) = input else {
            return Ok(Self {
                range: DateRange::day(today),
                defaulted: true,
            });
        };

        let (start, end) = match input.split_once("..").or_else(|| input.split_once('~')) {
            Some((start, end)) => (parse_bound(start, today)?, parse_bound(end, today)?),
            None => {
                let day = parse_bound(input, today)?;
                (day, day)
            }
        };

        let range = DateRange::new(start, end).ok_or_else(|| {
            CrawlError::Domain(format!(
                "Date range '{}' starts after it ends",
                input
            ))
        })?;

        Ok(Self {
            range,
            defaulted: false,
        })
    }
}

fn parse_bound(text: &str, today: NaiveDate) -> Result<NaiveDate> {
    let text = text.trim();
    match text.to_ascii_lowercase().as_str() {
        "today" => Ok(today),
        "yesterday" => Ok(today - Duration::days(1)),
        _ => parse_iso(text)
            .ok_or_else(|| CrawlError::Domain(format!("Invalid date '{}', expected YYYY-MM-DD", text))),
    }
}

fn parse_iso(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).ok()
}

/// Requested ordering of records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    /// Parses the accepted spellings
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "asc" | "ASC" | "ascending" | "ASCENDING" => Some(Self::Ascending),
            "desc" | "DESC" | "descending" | "DESCENDING" => Some(Self::Descending),
            _ => None,
        }
    }

    /// Normalizes an optional input, defaulting to descending
    ///
    /// Returns a notice when the default was applied.
    pub fn normalize(input: Option<&str>) -> (Self, Option<String>) {
        match input.and_then(Self::parse) {
            Some(order) => (order, None),
            None => {
                let notice = match input {
                    Some(raw) if !raw.trim().is_empty() => {
                        format!("Unknown sort order '{}', using descending", raw.trim())
                    }
                    _ => "No sort order given, using descending".to_string(),
                };
                (Self::Descending, Some(notice))
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        }
    }
}

/// First day of the month `lookback_months` before the month of `today`
pub fn oldest_allowed(today: NaiveDate, lookback_months: u32) -> NaiveDate {
    month_start(today)
        .checked_sub_months(Months::new(lookback_months))
        .unwrap_or(NaiveDate::MIN)
}

/// Clamps each bound of `requested` into `[oldest, today]`
///
/// Returns the corrected range and one notice per corrected bound.
pub fn validate_range(
    requested: DateRange,
    oldest: NaiveDate,
    today: NaiveDate,
) -> (DateRange, Vec<String>) {
    let mut notices = Vec::new();
    let start = clamp_bound("Start", requested.start, oldest, today, &mut notices);
    let end = clamp_bound("End", requested.end, oldest, today, &mut notices);

    // Both bounds were clamped independently, so start <= end still holds
    let range = DateRange::new(start, end).unwrap_or(DateRange::day(start));
    (range, notices)
}

fn clamp_bound(
    label: &str,
    date: NaiveDate,
    oldest: NaiveDate,
    today: NaiveDate,
    notices: &mut Vec<String>,
) -> NaiveDate {
    if date < oldest {
        notices.push(format!(
            "{} date {} is before the oldest available date {}, using {}",
            label, date, oldest, oldest
        ));
        oldest
    } else if date > today {
        notices.push(format!(
            "{} date {} is after today {}, using {}",
            label, date, today, today
        ));
        today
    } else {
        date
    }
}

/// Splits a range into the calendar months it touches
///
/// Every window spans a whole month, so the first and last windows may
/// overshoot the range; callers filter records against the original range.
pub fn split_by_month(range: &DateRange, order: SortOrder) -> Vec<DateRange> {
    let mut windows = Vec::new();
    let mut cursor = month_start(range.start);

    while cursor <= range.end {
        let end = month_end(cursor);
        windows.push(DateRange { start: cursor, end });
        match end.succ_opt() {
            Some(next) => cursor = next,
            None => break,
        }
    }

    if order == SortOrder::Descending {
        windows.reverse();
    }
    windows
}

/// Windows to query for `range`, none longer than `max_days`
///
/// A range within the limit is queried as is. A longer one is split into
/// calendar months, each ending no later than `today` and cut into pieces
/// of at most `max_days` days. Pieces outside `range` are dropped.
pub fn plan_windows(
    range: &DateRange,
    max_days: u32,
    today: NaiveDate,
    order: SortOrder,
) -> Vec<DateRange> {
    if range.days() <= i64::from(max_days) {
        return vec![*range];
    }

    let mut windows: Vec<DateRange> = split_by_month(range, SortOrder::Ascending)
        .into_iter()
        .filter_map(|month| DateRange::new(month.start, month.end.min(today)))
        .flat_map(|month| month.chunks(max_days))
        .filter(|window| window.intersect(range).is_some())
        .collect();

    if order == SortOrder::Descending {
        windows.reverse();
    }
    windows
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

fn month_end(date: NaiveDate) -> NaiveDate {
    month_start(date)
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

/// Parses a statement date, inferring a missing year from the window
///
/// Formats without a year take the year of the window's end, stepping back
/// one year when the result would land after the window end (a December
/// row in a window ending in January).
pub fn infer_date(text: &str, format: &str, window: &DateRange) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if format.contains("%Y") || format.contains("%y") {
        return NaiveDate::parse_from_str(text, format).ok();
    }

    let year = window.end.year();
    let date = NaiveDate::parse_from_str(&format!("{} {}", text, year), &format!("{} %Y", format))
        .ok()?;

    if date > window.end {
        date.with_year(year - 1)
    } else {
        Some(date)
    }
}

/// Formats a date with a user-supplied strftime pattern
pub fn format_date(date: NaiveDate, format: &str) -> Result<String> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(CrawlError::Plan(format!("Invalid date format '{}'", format)));
    }
    Ok(date.format(format).to_string())
}

/// Parses an ISO `YYYY-MM-DD` date
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    parse_iso(text)
}
