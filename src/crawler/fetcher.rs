//! HTTP transport
//!
//! This module handles all HTTP exchanges for the orchestrator, including:
//! - The `Transport` trait the run loop talks to
//! - Building HTTP clients with a cookie jar and a browser user agent
//! - Loading and saving the cookie jar so sessions survive between runs
//! - GET requests, or form POSTs when fields are pending
//! - Error classification
//!
//! Redirects are followed by the client. Non-2xx statuses are returned as
//! ordinary exchanges: portals answer with error pages that handlers must
//! be able to classify.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect::Policy, Client};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Desktop browser agent used when neither the configuration nor the run
/// settings provide one
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Result of one request/response cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exchange {
    /// Response body, empty on failure
    pub body: String,

    /// HTTP status code, when a response was received
    pub status: Option<u16>,

    /// URL after redirects
    pub final_url: Option<String>,

    /// Failure description; any value makes the exchange fatal for the run
    pub error: Option<String>,
}

impl Exchange {
    /// Creates a failed exchange
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Returns true if the exchange produced a response
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// One HTTP request/response cycle at a time, with a persistent cookie jar
///
/// The orchestrator calls `reset`, then configures the next request, then
/// calls `execute` exactly once.
#[async_trait]
pub trait Transport: Send {
    /// Drops per-request state (URL, headers, pending fields); keeps cookies
    fn reset(&mut self);

    /// Sets the destination URL
    fn set_url(&mut self, url: &str);

    /// Adds a header to the next request
    fn set_header(&mut self, name: &str, value: &str);

    /// Attaches form fields; the next request becomes a POST
    fn post_fields(&mut self, fields: BTreeMap<String, String>);

    /// Performs the request
    async fn execute(&mut self) -> Exchange;

    /// Writes the cookie jar to its backing file, if it has one
    fn save_cookies(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - The User-Agent header sent with every request
/// * `jar` - Cookie jar shared with the caller
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(
    user_agent: &str,
    jar: Arc<CookieStoreMutex>,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .cookie_provider(jar)
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Reads a jar saved by `save_cookies`
///
/// A missing or unreadable file yields an empty jar: the portal then asks
/// for a fresh login.
pub fn load_cookie_jar(path: &Path) -> CookieStore {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return CookieStore::default(),
        Err(e) => {
            tracing::warn!("Cannot open cookie jar {}: {}", path.display(), e);
            return CookieStore::default();
        }
    };

    match CookieStore::load_json_all(BufReader::new(file)) {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!("Discarding unreadable cookie jar {}: {}", path.display(), e);
            CookieStore::default()
        }
    }
}

/// `Transport` over a reqwest client
pub struct ReqwestTransport {
    client: Client,
    jar: Arc<CookieStoreMutex>,
    cookie_file: Option<PathBuf>,
    url: Option<String>,
    headers: HeaderMap,
    fields: Option<BTreeMap<String, String>>,
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("cookie_file", &self.cookie_file)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    /// Creates a transport with an in-memory cookie jar
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        Self::with_jar(user_agent, CookieStore::default(), None)
    }

    /// Creates a transport whose cookie jar is loaded from, and saved to,
    /// `path`
    pub fn with_cookie_file(
        user_agent: &str,
        path: impl Into<PathBuf>,
    ) -> Result<Self, reqwest::Error> {
        let path = path.into();
        let store = load_cookie_jar(&path);
        tracing::debug!("Cookie jar {} loaded", path.display());
        Self::with_jar(user_agent, store, Some(path))
    }

    fn with_jar(
        user_agent: &str,
        store: CookieStore,
        cookie_file: Option<PathBuf>,
    ) -> Result<Self, reqwest::Error> {
        let jar = Arc::new(CookieStoreMutex::new(store));
        let client = build_http_client(user_agent, Arc::clone(&jar))?;
        Ok(Self {
            client,
            jar,
            cookie_file,
            url: None,
            headers: HeaderMap::new(),
            fields: None,
        })
    }

    /// Number of cookies currently held
    pub fn cookie_count(&self) -> usize {
        match self.jar.lock() {
            Ok(store) => store.iter_any().count(),
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn reset(&mut self) {
        self.url = None;
        self.headers.clear();
        self.fields = None;
    }

    fn set_url(&mut self, url: &str) {
        self.url = Some(url.to_string());
    }

    fn set_header(&mut self, name: &str, value: &str) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => tracing::warn!("Skipping invalid header '{}'", name),
        }
    }

    fn post_fields(&mut self, fields: BTreeMap<String, String>) {
        self.fields = Some(fields);
    }

    async fn execute(&mut self) -> Exchange {
        let Some(url) = self.url.clone() else {
            return Exchange::failed("No URL set for request");
        };

        let request = match &self.fields {
            Some(fields) => self.client.post(&url).form(fields),
            None => self.client.get(&url),
        };

        match request.headers(self.headers.clone()).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let final_url = response.url().to_string();

                match response.text().await {
                    Ok(body) => Exchange {
                        body,
                        status: Some(status),
                        final_url: Some(final_url),
                        error: None,
                    },
                    Err(e) => Exchange {
                        status: Some(status),
                        final_url: Some(final_url),
                        ..Exchange::failed(format!("Failed to read response body: {}", e))
                    },
                }
            }
            Err(e) => Exchange::failed(classify_error(&e)),
        }
    }

    fn save_cookies(&self) -> io::Result<()> {
        let Some(path) = &self.cookie_file else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = self
            .jar
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "cookie jar lock poisoned"))?;
        let mut writer = BufWriter::new(File::create(path)?);
        store
            .save_incl_expired_and_nonpersistent_json(&mut writer)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        tracing::debug!("Saved {} cookies to {}", store.iter_any().count(), path.display());
        Ok(())
    }
}

/// Describes a request failure
fn classify_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "Request timeout".to_string()
    } else if e.is_connect() {
        "Connection refused".to_string()
    } else if e.is_redirect() {
        "Too many redirects".to_string()
    } else {
        e.to_string()
    }
}
