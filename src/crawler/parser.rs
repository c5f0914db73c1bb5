//! HTML document queries
//!
//! This module answers the questions handlers ask about a fetched page:
//! - Does the page match an indication predicate?
//! - Text and attributes of the n-th element matching a selector
//! - Form fields (including `<select>` choices) ready to be posted back
//! - Table rows as normalized cell text
//!
//! `scraper::Html` is not `Send`, so a `Document` is built after the network
//! exchange and dropped before the next one.

use crate::config::IndicationSpec;
use crate::{CrawlError, Result};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::collections::BTreeMap;
use url::Url;

/// Selects the `nth` element matching a CSS selector
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "LocatorRepr")]
pub struct Locator {
    pub selector: String,
    pub nth: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LocatorRepr {
    Selector(String),
    Indexed {
        selector: String,
        #[serde(default)]
        nth: usize,
    },
}

impl From<LocatorRepr> for Locator {
    fn from(repr: LocatorRepr) -> Self {
        match repr {
            LocatorRepr::Selector(selector) => Self { selector, nth: 0 },
            LocatorRepr::Indexed { selector, nth } => Self { selector, nth },
        }
    }
}

impl Locator {
    /// Locates the first element matching `selector`
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            nth: 0,
        }
    }

    /// Locates the `nth` (0-based) element instead of the first
    pub fn nth(mut self, nth: usize) -> Self {
        self.nth = nth;
        self
    }
}

/// One option of a `<select>` field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormChoice {
    pub value: String,
    pub label: String,
}

/// A form as it would be submitted without user edits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Form {
    /// Raw `action` attribute; resolve it against the page URL
    pub action: Option<String>,

    /// Upper-case method, `GET` when absent
    pub method: String,

    /// Successful controls and their current values
    pub fields: BTreeMap<String, String>,

    /// Options of every `<select>` field
    pub choices: BTreeMap<String, Vec<FormChoice>>,
}

/// A parsed HTML document
#[derive(Debug)]
pub struct Document {
    html: Html,
}

impl Document {
    /// Parses a response body
    pub fn parse(body: &str) -> Self {
        Self {
            html: Html::parse_document(body),
        }
    }

    /// Tests the document against an indication predicate
    ///
    /// With a selector, the `nth` matching element must exist (and contain
    /// the text, if one is given). Without a selector the whole document
    /// text is searched. An unparseable selector never matches.
    pub fn matches(&self, spec: &IndicationSpec) -> bool {
        let matched = match (&spec.selector, &spec.contains) {
            (Some(selector), contains) => match parse_selector(selector) {
                Ok(selector) => match self.html.select(&selector).nth(spec.nth) {
                    Some(element) => contains
                        .as_deref()
                        .map_or(true, |needle| element_text(&element).contains(needle)),
                    None => false,
                },
                Err(_) => {
                    tracing::warn!("Indication selector '{}' does not parse", selector);
                    return false;
                }
            },
            (None, Some(needle)) => self.text().contains(needle.as_str()),
            (None, None) => false,
        };

        matched != spec.negate
    }

    /// Normalized text of the whole document
    pub fn text(&self) -> String {
        normalize_whitespace(&self.html.root_element().text().collect::<String>())
    }

    /// Counts the elements matching a selector
    pub fn count(&self, selector: &str) -> Result<usize> {
        let selector = parse_selector(selector)?;
        Ok(self.html.select(&selector).count())
    }

    /// Normalized text of the located element
    pub fn extract_text(&self, locator: &Locator) -> Result<Option<String>> {
        Ok(self.locate(locator)?.map(|element| element_text(&element)))
    }

    /// Attribute value of the located element
    pub fn extract_attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>> {
        Ok(self
            .locate(locator)?
            .and_then(|element| element.value().attr(name).map(|v| v.trim().to_string())))
    }

    /// Fields of the located form
    ///
    /// Follows browser submission rules: buttons are not submitted,
    /// checkboxes and radios only when checked, a `<select>` submits its
    /// selected option or else its first one.
    pub fn extract_form(&self, locator: &Locator) -> Result<Option<Form>> {
        let Some(form) = self.locate(locator)? else {
            return Ok(None);
        };

        let controls = parse_selector("input[name], select[name], textarea[name]")?;
        let options = parse_selector("option")?;

        let mut extracted = Form {
            action: form.value().attr("action").map(|a| a.trim().to_string()),
            method: form
                .value()
                .attr("method")
                .unwrap_or("get")
                .trim()
                .to_ascii_uppercase(),
            ..Form::default()
        };

        for control in form.select(&controls) {
            let element = control.value();
            let Some(name) = element.attr("name") else {
                continue;
            };

            match element.name() {
                "input" => {
                    let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
                    match kind.as_str() {
                        "submit" | "button" | "image" | "reset" | "file" => continue,
                        "checkbox" | "radio" if element.attr("checked").is_none() => continue,
                        "checkbox" | "radio" => {
                            let value = element.attr("value").unwrap_or("on");
                            extracted.fields.insert(name.to_string(), value.to_string());
                        }
                        _ => {
                            let value = element.attr("value").unwrap_or("");
                            extracted.fields.insert(name.to_string(), value.to_string());
                        }
                    }
                }
                "select" => {
                    let choices: Vec<(FormChoice, bool)> = control
                        .select(&options)
                        .map(|option| {
                            let label = element_text(&option);
                            let value = option
                                .value()
                                .attr("value")
                                .map(str::to_string)
                                .unwrap_or_else(|| label.clone());
                            let selected = option.value().attr("selected").is_some();
                            (FormChoice { value, label }, selected)
                        })
                        .collect();

                    let current = choices
                        .iter()
                        .find(|(_, selected)| *selected)
                        .or_else(|| choices.first())
                        .map(|(choice, _)| choice.value.clone());

                    if let Some(value) = current {
                        extracted.fields.insert(name.to_string(), value);
                    }
                    extracted.choices.insert(
                        name.to_string(),
                        choices.into_iter().map(|(choice, _)| choice).collect(),
                    );
                }
                "textarea" => {
                    let value: String = control.text().collect();
                    extracted.fields.insert(name.to_string(), value);
                }
                _ => {}
            }
        }

        Ok(Some(extracted))
    }

    /// Rows of the located table as normalized cell text
    ///
    /// Rows without cells are skipped. Returns an empty list when the table
    /// is missing.
    pub fn extract_table(&self, locator: &Locator) -> Result<Vec<Vec<String>>> {
        let Some(table) = self.locate(locator)? else {
            return Ok(Vec::new());
        };

        let rows = parse_selector("tr")?;
        let cells = parse_selector("th, td")?;

        Ok(table
            .select(&rows)
            .map(|row| row.select(&cells).map(|cell| element_text(&cell)).collect::<Vec<_>>())
            .filter(|row| !row.is_empty())
            .collect())
    }

    fn locate(&self, locator: &Locator) -> Result<Option<ElementRef<'_>>> {
        let selector = parse_selector(&locator.selector)?;
        Ok(self.html.select(&selector).nth(locator.nth))
    }
}

/// A fetched page handed to indication handlers
#[derive(Debug)]
pub struct Page {
    /// Menu that was visited
    pub menu: String,

    /// Indication that matched, if the visit was verified
    pub indication: Option<String>,

    /// URL after redirects
    pub url: String,

    /// HTTP status, when the transport reports one
    pub status: Option<u16>,

    pub document: Document,
}

impl Page {
    /// Resolves a link found on this page to an absolute http(s) URL
    pub fn resolve_url(&self, href: &str) -> Option<String> {
        let base = Url::parse(&self.url).ok()?;
        resolve_link(href, &base)
    }
}

/// Resolves a link href to an absolute URL
///
/// Returns None if the link should be ignored:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - fragment-only links
/// - Non-HTTP(S) URLs after resolution
pub fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
        || href.starts_with('#')
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute_url) if matches!(absolute_url.scheme(), "http" | "https") => {
            Some(absolute_url.to_string())
        }
        _ => None,
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|_| CrawlError::Plan(format!("Invalid selector '{}'", selector)))
}

fn element_text(element: &ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

/// Collapses runs of whitespace (including non-breaking spaces) to one space
pub fn normalize_whitespace(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
