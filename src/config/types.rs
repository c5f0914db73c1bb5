use crate::crawler::Step;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use toml::Table;

/// Pacing delay used when the configured one is missing or out of range
pub const DEFAULT_DELAY_SECS: f64 = 0.35;

/// Upper bound for a configured pacing delay
pub const MAX_DELAY_SECS: f64 = 2.0;

/// Name of the persisted override file inside the working directory
pub const DEFAULT_CONFIGURATION_FILE: &str = "configuration.toml";

/// Name of the persisted cookie jar inside the working directory
pub const COOKIE_FILE: &str = "cookies.json";

/// Portal definition bundle as stored on disk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleFile {
    /// Portal name; defaults to the file stem
    pub name: Option<String>,

    /// Free-form description shown by the CLI
    #[serde(default)]
    pub description: String,

    /// Default configuration tree (menus, indications, plans, limits)
    #[serde(default)]
    pub configuration: Table,

    /// Handler name to action list
    #[serde(default)]
    pub handler: Table,
}

/// A named remote page, stored at `menu.<name>`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MenuDefinition {
    /// Address of the page, usually captured by a previous handler
    pub url: Option<String>,

    /// Pending POST body, consumed by the next visit
    pub fields: Option<BTreeMap<String, String>>,

    /// Indication name to handler reference, in declaration order
    #[serde(default)]
    pub indication: Table,

    /// Extra request headers for every visit to this menu
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Fixed Referer, used instead of the previously visited URL
    pub referer: Option<String>,
}

/// Handler reference: a single name or an ordered list of candidates
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HandlerRef {
    One(String),
    Chain(Vec<String>),
}

impl HandlerRef {
    /// Candidate handler names, in priority order
    pub fn candidates(&self) -> Vec<&str> {
        match self {
            Self::One(name) => vec![name.as_str()],
            Self::Chain(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// Page-shape predicate, stored at `indication.<name>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IndicationSpec {
    /// CSS selector of the element to look for
    pub selector: Option<String>,

    /// Index of the matched element to inspect
    #[serde(default)]
    pub nth: usize,

    /// Text the element (or the whole page) must contain
    pub contains: Option<String>,

    /// Inverts the outcome
    #[serde(default)]
    pub negate: bool,
}

/// Date-window limits of a portal, stored at `window`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WindowSettings {
    /// Longest span the portal serves in a single query
    #[serde(default = "default_max_days")]
    pub max_days: u32,

    /// How many whole months back the portal keeps history
    #[serde(default = "default_lookback_months")]
    pub lookback_months: u32,

    /// Record key holding the transaction date
    #[serde(default = "default_date_field")]
    pub date_field: String,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            max_days: default_max_days(),
            lookback_months: default_lookback_months(),
            date_field: default_date_field(),
        }
    }
}

fn default_max_days() -> u32 {
    31
}

fn default_lookback_months() -> u32 {
    2
}

fn default_date_field() -> String {
    "date".to_string()
}

/// Session-expiry settings, stored at `session`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionSettings {
    /// Seconds after the last visit at which the remote session is stale
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Step that restarts a session; defaults to re-planning the target
    pub bootstrap: Option<Step>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            bootstrap: None,
        }
    }
}

fn default_ttl_secs() -> u64 {
    480
}

/// Per-run engine settings supplied by the caller
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Directory holding the persisted overrides, the cookie jar and debug
    /// captures
    pub working_dir: PathBuf,

    /// File name of the persisted overrides
    pub configuration_file: String,

    /// Seconds to pause between steps
    pub delay_secs: Option<f64>,

    /// Capture every exchange under `debug/`
    pub debug: bool,

    /// User agent used when the configuration has none yet
    pub user_agent: Option<String>,
}

impl RunSettings {
    /// Creates settings rooted at `working_dir`
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            configuration_file: DEFAULT_CONFIGURATION_FILE.to_string(),
            delay_secs: None,
            debug: false,
            user_agent: None,
        }
    }

    /// Sets the pacing delay in seconds
    pub fn with_delay(mut self, secs: f64) -> Self {
        self.delay_secs = Some(secs);
        self
    }

    /// Enables debug capture
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Path of the persisted override file
    pub fn configuration_path(&self) -> PathBuf {
        self.working_dir.join(&self.configuration_file)
    }

    /// Path of the persisted cookie jar
    pub fn cookie_path(&self) -> PathBuf {
        self.working_dir.join(COOKIE_FILE)
    }

    /// The pause between steps
    ///
    /// A configured value outside `[0, 2]` seconds (or not a number) falls
    /// back to the default of 0.35 s.
    pub fn pacing_delay(&self) -> Duration {
        let secs = match self.delay_secs {
            Some(secs) if (0.0..=MAX_DELAY_SECS).contains(&secs) => secs,
            _ => DEFAULT_DELAY_SECS,
        };
        Duration::from_secs_f64(secs)
    }
}
