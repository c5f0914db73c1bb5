//! Declarative handler actions
//!
//! Bundle handlers are lists of actions run in order against the handler's
//! context. Actions that read the page need a visit step; the others work
//! on task steps as well.
//!
//! Values captured with `into = "result"` become the run's result,
//! `into = "result.<key>"` fills one key of a result table, and any other
//! path is written to the configuration.

use crate::config::{IndicationSpec, WindowSettings};
use crate::crawler::{Handler, Locator, RunContext, Step};
use crate::window::{accumulate_records, current_window, format_date, infer_date, DateRange};
use crate::{CrawlError, Result};
use scraper::Selector;
use serde::Deserialize;
use std::collections::BTreeMap;
use toml::{Table, Value};

/// One declarative handler step
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Stores an attribute of the located element
    CaptureAttribute {
        selector: String,
        #[serde(default)]
        nth: usize,
        attribute: String,
        into: String,
        /// Resolve the value as a link relative to the page
        #[serde(default)]
        resolve: bool,
        /// A missing element fails verification of the menu
        #[serde(default)]
        required: bool,
    },

    /// Stores the text of the located element
    CaptureText {
        selector: String,
        #[serde(default)]
        nth: usize,
        into: String,
        #[serde(default)]
        required: bool,
    },

    /// Prepares the submission of a form as the next visit to `menu`
    CaptureForm {
        selector: String,
        #[serde(default)]
        nth: usize,
        menu: String,
        /// Fixed field values
        #[serde(default)]
        submit: BTreeMap<String, String>,
        /// Field name to session input name
        #[serde(default)]
        credentials: BTreeMap<String, String>,
        /// Fields dropped from the submission
        #[serde(default)]
        remove: Vec<String>,
        /// `<select>` holding the caller's account
        account: Option<String>,
        /// Field name to `start:<format>` or `end:<format>` of the window
        #[serde(default)]
        dates: BTreeMap<String, String>,
    },

    /// Stores the rows of a table, as lists or as tables keyed by `columns`
    CaptureTable {
        selector: String,
        #[serde(default)]
        nth: usize,
        into: String,
        #[serde(default)]
        columns: Vec<String>,
        #[serde(default)]
        skip_rows: usize,
    },

    /// Adds statement rows to the records of the current window
    CollectRows {
        selector: String,
        #[serde(default)]
        nth: usize,
        columns: Vec<String>,
        #[serde(default)]
        skip_rows: usize,
        /// Column holding the date; defaults to `window.date_field`
        date_column: Option<String>,
        #[serde(default = "default_date_format")]
        date_format: String,
        /// Date cells of rows not yet booked
        #[serde(default = "default_pending_markers")]
        pending: Vec<String>,
    },

    /// Writes `value` to `path` when the page matches
    Mark {
        selector: Option<String>,
        #[serde(default)]
        nth: usize,
        contains: Option<String>,
        #[serde(default)]
        negate: bool,
        path: String,
        value: Value,
    },

    /// Runs steps before everything pending
    Prepend {
        #[serde(default)]
        steps: Vec<Step>,
        reference: Option<String>,
    },

    /// Runs steps after everything pending
    Append {
        #[serde(default)]
        steps: Vec<Step>,
        reference: Option<String>,
    },

    /// Appends one of two references depending on a session input
    Branch {
        input: String,
        present: Option<String>,
        absent: Option<String>,
    },

    /// Writes a configuration value, or the run result when `path` is
    /// `result` or `result.<key>`
    Set { path: String, value: Value },

    /// Removes a configuration override
    Unset { path: String },

    /// Discards the pending plan and restarts at `step`
    Reset { step: Step },

    /// Fails the run; the text of `selector`, if present, is appended
    Fail {
        message: String,
        selector: Option<String>,
    },

    /// Ends the run after this handler
    Stop,
}

fn default_date_format() -> String {
    "%d/%m/%Y".to_string()
}

fn default_pending_markers() -> Vec<String> {
    vec!["PEND".to_string()]
}

impl Action {
    /// Applies the action
    pub fn apply(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        match self {
            Self::CaptureAttribute {
                selector,
                nth,
                attribute,
                into,
                resolve,
                required,
            } => {
                let locator = Locator::new(selector).nth(*nth);
                let value = ctx.document()?.extract_attribute(&locator, attribute)?;
                let value = match value {
                    Some(v) if *resolve => ctx.resolve_url(&v),
                    other => other,
                };
                match value {
                    Some(v) => store(ctx, into, Value::from(v)),
                    None if *required => Err(ctx.verification(format!(
                        "attribute '{}' of '{}' not found",
                        attribute, selector
                    ))),
                    None => Ok(()),
                }
            }

            Self::CaptureText {
                selector,
                nth,
                into,
                required,
            } => {
                let locator = Locator::new(selector).nth(*nth);
                match ctx.document()?.extract_text(&locator)? {
                    Some(text) => store(ctx, into, Value::from(text)),
                    None if *required => {
                        Err(ctx.verification(format!("element '{}' not found", selector)))
                    }
                    None => Ok(()),
                }
            }

            Self::CaptureForm {
                selector,
                nth,
                menu,
                submit,
                credentials,
                remove,
                account,
                dates,
            } => {
                let page = ctx.page()?;
                let locator = Locator::new(selector).nth(*nth);
                let form = page
                    .document
                    .extract_form(&locator)?
                    .ok_or_else(|| ctx.verification(format!("form '{}' not found", selector)))?;

                let url = match form.action.as_deref().filter(|a| !a.is_empty()) {
                    Some(action) => page.resolve_url(action).ok_or_else(|| {
                        ctx.verification(format!("form action '{}' is not a usable URL", action))
                    })?,
                    None => page.url.clone(),
                };

                let mut fields = form.fields.clone();
                for name in remove {
                    fields.remove(name);
                }
                for (name, value) in submit {
                    fields.insert(name.clone(), value.clone());
                }
                for (name, input) in credentials {
                    let value = ctx.session.input(input).ok_or_else(|| {
                        CrawlError::Domain(format!("Missing input '{}'", input))
                    })?;
                    fields.insert(name.clone(), value.to_string());
                }
                if let Some(field) = account {
                    if let Some(wanted) = ctx.session.input("account") {
                        let choices = form.choices.get(field).map(Vec::as_slice).unwrap_or_default();
                        let choice = choices
                            .iter()
                            .find(|c| c.value == wanted || c.label.contains(wanted))
                            .ok_or_else(|| {
                                CrawlError::Domain(format!("Account '{}' is not available", wanted))
                            })?;
                        fields.insert(field.clone(), choice.value.clone());
                    }
                }
                if !dates.is_empty() {
                    let window = current_window(ctx.config).ok_or_else(|| {
                        CrawlError::Plan("Date fields requested outside a window".to_string())
                    })?;
                    for (name, spec) in dates {
                        fields.insert(name.clone(), window_date(&window, spec)?);
                    }
                }

                let fields: Table = fields.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
                tracing::debug!("Prepared {} field(s) for menu '{}'", fields.len(), menu);
                ctx.config.set(&format!("menu.{}.url", menu), url);
                ctx.config.set(&format!("menu.{}.fields", menu), fields);
                Ok(())
            }

            Self::CaptureTable {
                selector,
                nth,
                into,
                columns,
                skip_rows,
            } => {
                let locator = Locator::new(selector).nth(*nth);
                let rows = ctx.document()?.extract_table(&locator)?;
                let rows: Vec<Value> = rows
                    .into_iter()
                    .skip(*skip_rows)
                    .map(|cells| {
                        if columns.is_empty() {
                            Value::Array(cells.into_iter().map(Value::from).collect())
                        } else {
                            Value::Table(row_table(columns, cells))
                        }
                    })
                    .collect();
                store(ctx, into, Value::Array(rows))
            }

            Self::CollectRows {
                selector,
                nth,
                columns,
                skip_rows,
                date_column,
                date_format,
                pending,
            } => {
                let settings = ctx
                    .config
                    .get_as::<WindowSettings>("window")
                    .map_err(|e| CrawlError::Plan(e.to_string()))?
                    .unwrap_or_default();
                let date_column = date_column.clone().unwrap_or(settings.date_field);
                let window = current_window(ctx.config).unwrap_or(DateRange::day(ctx.today));

                let locator = Locator::new(selector).nth(*nth);
                let rows = ctx.document()?.extract_table(&locator)?;

                let mut records = Vec::new();
                for cells in rows.into_iter().skip(*skip_rows) {
                    if cells.len() < columns.len() {
                        continue;
                    }
                    let mut record = row_table(columns, cells);
                    if let Some(Value::String(raw)) = record.get(&date_column).cloned() {
                        let date = if pending.iter().any(|p| p == raw.trim()) {
                            String::new()
                        } else {
                            match infer_date(&raw, date_format, &window) {
                                Some(date) => date.format("%Y-%m-%d").to_string(),
                                None => {
                                    tracing::debug!("Skipping row with date '{}'", raw);
                                    continue;
                                }
                            }
                        };
                        record.insert(date_column.clone(), Value::from(date));
                    }
                    records.push(Value::Table(record));
                }

                let found = records.len();
                let total = accumulate_records(ctx.config, records);
                tracing::debug!("Collected {} row(s) in {}, {} so far", found, window, total);
                Ok(())
            }

            Self::Mark {
                selector,
                nth,
                contains,
                negate,
                path,
                value,
            } => {
                let spec = IndicationSpec {
                    selector: selector.clone(),
                    nth: *nth,
                    contains: contains.clone(),
                    negate: *negate,
                };
                if ctx.document()?.matches(&spec) {
                    ctx.config.set(path, value.clone());
                }
                Ok(())
            }

            Self::Prepend { steps, reference } => {
                let steps = collect_steps(ctx, steps, reference.as_deref())?;
                ctx.queue.prepend(steps);
                Ok(())
            }

            Self::Append { steps, reference } => {
                let steps = collect_steps(ctx, steps, reference.as_deref())?;
                ctx.queue.append(steps);
                Ok(())
            }

            Self::Branch {
                input,
                present,
                absent,
            } => {
                let chosen = if ctx.session.input(input).is_some() {
                    present
                } else {
                    absent
                };
                if let Some(reference) = chosen {
                    let steps = ctx.reference(reference)?;
                    ctx.queue.append(steps);
                }
                Ok(())
            }

            Self::Set { path, value } => store(ctx, path, value.clone()),

            Self::Unset { path } => {
                ctx.config.unset(path);
                Ok(())
            }

            Self::Reset { step } => {
                ctx.queue.reset(step.clone());
                Ok(())
            }

            Self::Fail { message, selector } => {
                let detail = match (selector, ctx.page) {
                    (Some(selector), Some(page)) => page.document.extract_text(&Locator::new(selector))?,
                    _ => None,
                };
                Err(match detail {
                    Some(detail) if !detail.is_empty() => {
                        CrawlError::Domain(format!("{}: {}", message, detail))
                    }
                    _ => CrawlError::Domain(message.clone()),
                })
            }

            Self::Stop => {
                ctx.stop();
                Ok(())
            }
        }
    }

    /// Checks selectors and references against the configuration tree
    pub fn validate(&self, tree: &Table) -> std::result::Result<(), String> {
        let selectors: Vec<&str> = match self {
            Self::CaptureAttribute { selector, .. }
            | Self::CaptureText { selector, .. }
            | Self::CaptureForm { selector, .. }
            | Self::CaptureTable { selector, .. }
            | Self::CollectRows { selector, .. } => vec![selector.as_str()],
            Self::Mark { selector, .. } | Self::Fail { selector, .. } => {
                selector.iter().map(String::as_str).collect()
            }
            _ => Vec::new(),
        };
        for selector in selectors {
            if Selector::parse(selector).is_err() {
                return Err(format!("invalid selector '{}'", selector));
            }
        }

        let references: Vec<&str> = match self {
            Self::Prepend { reference, .. } | Self::Append { reference, .. } => {
                reference.iter().map(String::as_str).collect()
            }
            Self::Branch { present, absent, .. } => present
                .iter()
                .chain(absent.iter())
                .map(String::as_str)
                .collect(),
            _ => Vec::new(),
        };
        let defined = tree.get("reference").and_then(Value::as_table);
        for reference in references {
            if !defined.is_some_and(|table| table.contains_key(reference)) {
                return Err(format!("unknown reference '{}'", reference));
            }
        }

        if let Self::CaptureForm { menu, dates, .. } = self {
            let known = tree
                .get("menu")
                .and_then(Value::as_table)
                .is_some_and(|menus| menus.contains_key(menu));
            if !known {
                return Err(format!("unknown menu '{}'", menu));
            }
            for spec in dates.values() {
                parse_date_spec(spec)?;
            }
        }

        Ok(())
    }
}

/// A named list of actions
#[derive(Debug, Clone)]
pub struct ActionList {
    pub name: String,
    pub actions: Vec<Action>,
}

impl Handler for ActionList {
    fn handle(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        for action in &self.actions {
            action.apply(ctx)?;
            if ctx.session.stop {
                tracing::debug!("Handler '{}' stopped the run", self.name);
                break;
            }
        }
        Ok(())
    }
}

/// Writes a captured value to the result or the configuration
fn store(ctx: &mut RunContext<'_>, into: &str, value: Value) -> Result<()> {
    match into.strip_prefix("result") {
        Some("") => {
            ctx.set_result(value);
            Ok(())
        }
        Some(key) if key.starts_with('.') => {
            let mut table = match ctx.session.result.take() {
                Some(Value::Table(table)) => table,
                _ => Table::new(),
            };
            table.insert(key[1..].to_string(), value);
            ctx.set_result(Value::Table(table));
            Ok(())
        }
        _ => {
            ctx.config.set(into, value);
            Ok(())
        }
    }
}

fn row_table(columns: &[String], cells: Vec<String>) -> Table {
    columns
        .iter()
        .cloned()
        .zip(cells.into_iter().map(Value::from))
        .collect()
}

fn collect_steps(ctx: &RunContext<'_>, inline: &[Step], reference: Option<&str>) -> Result<Vec<Step>> {
    let mut steps = inline.to_vec();
    if let Some(name) = reference {
        steps.extend(ctx.reference(name)?);
    }
    Ok(steps)
}

fn parse_date_spec(spec: &str) -> std::result::Result<(bool, &str), String> {
    match spec.split_once(':') {
        Some(("start", format)) => Ok((true, format)),
        Some(("end", format)) => Ok((false, format)),
        _ => Err(format!(
            "date spec '{}' must look like start:<format> or end:<format>",
            spec
        )),
    }
}

fn window_date(window: &DateRange, spec: &str) -> Result<String> {
    let (is_start, format) = parse_date_spec(spec).map_err(CrawlError::Plan)?;
    format_date(if is_start { window.start } else { window.end }, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::crawler::{Document, Page, Session, StepQueue};
    use crate::window::{RANGE_CURRENT, RANGE_RECORDS};
    use chrono::NaiveDate;

    const STATEMENT: &str = r#"
        <html><body>
            <a id="logout" href="/logout">Keluar</a>
            <div class="error"> PIN salah </div>
            <form name="inquiry" action="statement/view" method="post">
                <input type="hidden" name="token" value="t0k">
                <input type="text" name="user">
                <input type="password" name="pin">
                <select name="acct">
                    <option value="">-- pilih --</option>
                    <option value="0011">Tabungan 0011</option>
                    <option value="0022">Giro 0022</option>
                </select>
                <input type="text" name="start_day">
                <input type="text" name="end_day">
                <input type="hidden" name="trap" value="x">
            </form>
            <span id="balance">Rp 1.250.000,00</span>
            <table id="mutasi">
                <tr><th>Tanggal</th><th>Keterangan</th><th>Jumlah</th></tr>
                <tr><td>30/12</td><td>BUNGA</td><td>1,00</td></tr>
                <tr><td>02/01</td><td>TRSF</td><td>500,00</td></tr>
                <tr><td>PEND</td><td>BIAYA</td><td>2,00</td></tr>
                <tr><td colspan="3">Saldo akhir</td></tr>
            </table>
        </body></html>
    "#;

    fn defaults() -> Table {
        toml::from_str(
            r#"
[menu.statement_result]

[reference]
login = [{ type = "visit", menu = "login_page" }]
range_window = []
"#,
        )
        .unwrap()
    }

    fn page() -> Page {
        Page {
            menu: "statement_form".to_string(),
            indication: Some("statement_form".to_string()),
            url: "https://bank.example/app/home".to_string(),
            status: Some(200),
            document: Document::parse(STATEMENT),
        }
    }

    struct Fixture {
        session: Session,
        queue: StepQueue,
        config: ConfigStore,
        step: Step,
        page: Page,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                session: Session::new("get_transaction").with_credentials("alice", "123456"),
                queue: StepQueue::new(),
                config: ConfigStore::new(defaults()),
                step: Step::visit("statement_form"),
                page: page(),
            }
        }

        fn apply(&mut self, action: &Action) -> Result<()> {
            let mut ctx = RunContext {
                session: &mut self.session,
                queue: &mut self.queue,
                config: &mut self.config,
                step: &self.step,
                page: Some(&self.page),
                today: NaiveDate::from_ymd_opt(2024, 1, 14).unwrap(),
            };
            action.apply(&mut ctx)
        }
    }

    fn action(text: &str) -> Action {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn test_capture_attribute_resolves_links() {
        let mut fixture = Fixture::new();
        fixture
            .apply(&action(
                r##"
action = "capture_attribute"
selector = "#logout"
attribute = "href"
into = "menu.logout.url"
resolve = true
"##,
            ))
            .unwrap();

        assert_eq!(
            fixture.config.get_str("menu.logout.url").as_deref(),
            Some("https://bank.example/logout")
        );
    }

    #[test]
    fn test_required_capture_fails_verification() {
        let mut fixture = Fixture::new();
        let result = fixture.apply(&action(
            r##"
action = "capture_text"
selector = "#missing"
into = "result"
required = true
"##,
        ));
        match result {
            Err(CrawlError::Verification { menu, .. }) => assert_eq!(menu, "statement_form"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_capture_text_into_result_key() {
        let mut fixture = Fixture::new();
        fixture
            .apply(&action(
                "action = \"capture_text\"\nselector = \"#balance\"\ninto = \"result.balance\"",
            ))
            .unwrap();

        let balance = fixture.session.result.as_ref().and_then(|r| r.get("balance"));
        assert_eq!(balance.and_then(Value::as_str), Some("Rp 1.250.000,00"));
    }

    #[test]
    fn test_set_writes_config_or_result() {
        let mut fixture = Fixture::new();
        fixture
            .apply(&action("action = \"set\"\npath = \"menu.home.url\"\nvalue = \"/x\""))
            .unwrap();
        fixture
            .apply(&action("action = \"set\"\npath = \"result\"\nvalue = \"Logout Success\""))
            .unwrap();

        assert_eq!(fixture.config.get_str("menu.home.url").as_deref(), Some("/x"));
        assert!(fixture.config.get("result").is_none());
        assert_eq!(
            fixture.session.result.as_ref().and_then(Value::as_str),
            Some("Logout Success")
        );
    }

    #[test]
    fn test_capture_form() {
        let mut fixture = Fixture::new();
        fixture.session.set("account", "0022");
        fixture.config.set(
            RANGE_CURRENT,
            DateRange::new(
                NaiveDate::from_ymd_opt(2023, 12, 15).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 14).unwrap(),
            )
            .unwrap()
            .to_value(),
        );

        fixture
            .apply(&action(
                r#"
action = "capture_form"
selector = "form[name=inquiry]"
menu = "statement_result"
account = "acct"
remove = ["trap"]
submit = { view = "1" }
credentials = { user = "username", pin = "password" }
dates = { start_day = "start:%d/%m/%Y", end_day = "end:%d/%m/%Y" }
"#,
            ))
            .unwrap();

        assert_eq!(
            fixture.config.get_str("menu.statement_result.url").as_deref(),
            Some("https://bank.example/app/statement/view")
        );
        let fields = fixture.config.get("menu.statement_result.fields").unwrap();
        let field = |name: &str| fields.get(name).and_then(Value::as_str).map(str::to_string);
        assert_eq!(field("token").as_deref(), Some("t0k"));
        assert_eq!(field("user").as_deref(), Some("alice"));
        assert_eq!(field("pin").as_deref(), Some("123456"));
        assert_eq!(field("acct").as_deref(), Some("0022"));
        assert_eq!(field("view").as_deref(), Some("1"));
        assert_eq!(field("start_day").as_deref(), Some("15/12/2023"));
        assert_eq!(field("end_day").as_deref(), Some("14/01/2024"));
        assert!(field("trap").is_none());
    }

    #[test]
    fn test_capture_form_unknown_account() {
        let mut fixture = Fixture::new();
        fixture.session.set("account", "9999");
        let result = fixture.apply(&action(
            "action = \"capture_form\"\nselector = \"form\"\nmenu = \"statement_result\"\naccount = \"acct\"",
        ));
        assert!(matches!(result, Err(CrawlError::Domain(_))));
    }

    #[test]
    fn test_capture_table_with_columns() {
        let mut fixture = Fixture::new();
        fixture
            .apply(&action(
                r##"
action = "capture_table"
selector = "#mutasi"
into = "result"
columns = ["date", "description", "amount"]
skip_rows = 1
"##,
            ))
            .unwrap();

        let rows = fixture.session.result.as_ref().and_then(Value::as_array).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].get("description").and_then(Value::as_str), Some("BUNGA"));
    }

    #[test]
    fn test_collect_rows_infers_dates() {
        let mut fixture = Fixture::new();
        fixture.config.set(
            RANGE_CURRENT,
            DateRange::new(
                NaiveDate::from_ymd_opt(2023, 12, 15).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 14).unwrap(),
            )
            .unwrap()
            .to_value(),
        );

        fixture
            .apply(&action(
                r##"
action = "collect_rows"
selector = "#mutasi"
columns = ["date", "description", "amount"]
skip_rows = 1
date_format = "%d/%m"
"##,
            ))
            .unwrap();

        let records = fixture.config.get(RANGE_RECORDS).unwrap();
        let dates: Vec<&str> = records
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.get("date").and_then(Value::as_str).unwrap())
            .collect();
        assert_eq!(dates, vec!["2023-12-30", "2024-01-02", ""]);
    }

    #[test]
    fn test_mark_and_branch() {
        let mut fixture = Fixture::new();
        fixture
            .apply(&action(
                "action = \"mark\"\nselector = \"#logout\"\npath = \"language\"\nvalue = \"id\"",
            ))
            .unwrap();
        assert_eq!(fixture.config.get_str("language").as_deref(), Some("id"));

        fixture
            .apply(&action(
                "action = \"branch\"\ninput = \"range\"\npresent = \"range_window\"\nabsent = \"login\"",
            ))
            .unwrap();
        assert_eq!(fixture.queue.pop(), Some(Step::visit("login_page")));
    }

    #[test]
    fn test_prepend_inline_and_reference() {
        let mut fixture = Fixture::new();
        fixture.queue.append([Step::visit("account_page")]);
        fixture
            .apply(&action(
                r#"
action = "prepend"
steps = [{ type = "visit", menu = "home_page" }]
reference = "login"
"#,
            ))
            .unwrap();

        let menus: Vec<String> = fixture.queue.pending().map(|s| s.menu.clone()).collect();
        assert_eq!(menus, vec!["home_page", "login_page", "account_page"]);
    }

    #[test]
    fn test_fail_includes_page_text() {
        let mut fixture = Fixture::new();
        let result = fixture.apply(&action(
            "action = \"fail\"\nmessage = \"Login failed\"\nselector = \".error\"",
        ));
        match result {
            Err(CrawlError::Domain(message)) => assert_eq!(message, "Login failed: PIN salah"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_action_list_stops_early() {
        let mut fixture = Fixture::new();
        let list = ActionList {
            name: "logout".to_string(),
            actions: vec![
                Action::Stop,
                Action::Set {
                    path: "never".to_string(),
                    value: Value::from(true),
                },
            ],
        };
        let mut ctx = RunContext {
            session: &mut fixture.session,
            queue: &mut fixture.queue,
            config: &mut fixture.config,
            step: &fixture.step,
            page: Some(&fixture.page),
            today: NaiveDate::from_ymd_opt(2024, 1, 14).unwrap(),
        };
        list.handle(&mut ctx).unwrap();
        assert!(fixture.session.stop);
        assert!(fixture.config.get("never").is_none());
    }

    #[test]
    fn test_validate_actions() {
        let tree = defaults();
        assert!(action("action = \"prepend\"\nreference = \"login\"").validate(&tree).is_ok());
        assert!(action("action = \"prepend\"\nreference = \"nope\"").validate(&tree).is_err());
        assert!(action("action = \"capture_text\"\nselector = \"p[\"\ninto = \"x\"")
            .validate(&tree)
            .is_err());
        assert!(action("action = \"capture_form\"\nselector = \"form\"\nmenu = \"nowhere\"")
            .validate(&tree)
            .is_err());
        assert!(action(
            "action = \"capture_form\"\nselector = \"form\"\nmenu = \"statement_result\"\ndates = { d = \"middle:%d\" }"
        )
        .validate(&tree)
        .is_err());
    }
}
