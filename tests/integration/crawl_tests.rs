//! Integration tests for the crawl engine
//!
//! These tests use wiremock to stand in for the Example Bank portal and
//! drive the bundled portal definition end-to-end.

use chrono::NaiveDate;
use ibank_crawler::config::{ConfigStore, PersistOutcome};
use ibank_crawler::crawler::{run_target, Orchestrator, Session, Step, LAST_VISIT};
use ibank_crawler::portal::BundlePortal;
use ibank_crawler::{CrawlError, RunPhase, RunSettings};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use toml::Value;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BUNDLE: &str = include_str!("../../bundles/example-bank.toml");
const BANK_URL: &str = "https://ibank.example-bank.test";

/// Loads the example bundle with every portal URL pointing at `base_url`
fn portal_at(base_url: &str) -> Arc<BundlePortal> {
    let text = BUNDLE.replace(BANK_URL, base_url);
    Arc::new(BundlePortal::parse(&text).expect("Example bundle should parse"))
}

fn settings(dir: &Path) -> RunSettings {
    RunSettings::new(dir).with_delay(0.0)
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(format!("<html><body>{}</body></html>", body))
        .insert_header("content-type", "text/html; charset=utf-8")
}

async fn mount(server: &MockServer, verb: &str, route: &str, body: &str) {
    Mock::given(method(verb))
        .and(path(route))
        .respond_with(html(body))
        .mount(server)
        .await;
}

/// Mounts the public home page and the login pages
async fn mount_login(server: &MockServer) {
    mount(server, "GET", "/", r#"<a id="login" href="/auth/login">Masuk</a>"#).await;
    mount(
        server,
        "GET",
        "/auth/login",
        r#"<form id="login" action="/auth/verify" method="post">
            <input type="hidden" name="token" value="t0k3n">
            <input type="text" name="user">
            <input type="password" name="pass">
        </form>"#,
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/auth/verify"))
        .and(body_string_contains("user=alice"))
        .and(body_string_contains("pass=123456"))
        .and(body_string_contains("token=t0k3n"))
        .respond_with(html(
            r#"<div id="welcome">Selamat datang</div>
               <a id="home" href="/app/home?sid=s1">Beranda</a>"#,
        ))
        .mount(server)
        .await;

    mount(
        server,
        "GET",
        "/app/home",
        r#"<a id="logout" href="/logout">Keluar</a>
           <a id="accounts" href="/app/accounts?sid=s1">Rekening</a>
           <a id="statement" href="/app/statement?sid=s1">Mutasi</a>"#,
    )
    .await;
}

async fn mount_balance(server: &MockServer) {
    mount(
        server,
        "GET",
        "/app/accounts",
        r#"<form id="balance" action="/app/balance" method="post">
            <select name="acct">
                <option value="0011">Tabungan 0011</option>
                <option value="0022">Giro 0022</option>
            </select>
        </form>"#,
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/app/balance"))
        .and(body_string_contains("acct=0022"))
        .respond_with(html(r#"<span id="balance">Rp 1.250.000,00</span>"#))
        .mount(server)
        .await;
}

fn balance_session() -> Session {
    let mut session = Session::new("get_balance").with_credentials("alice", "123456");
    session.set("account", "0022");
    session
}

#[tokio::test]
async fn test_get_balance_end_to_end() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_balance(&server).await;

    let dir = TempDir::new().unwrap();
    let mut orchestrator = Orchestrator::open(portal_at(&server.uri()), settings(dir.path()))
        .expect("Failed to open orchestrator");

    let outcome = orchestrator.run(balance_session()).await;

    assert!(outcome.is_success(), "errors: {:?}", outcome.errors);
    assert_eq!(outcome.state, RunPhase::Stopped);
    assert_eq!(
        outcome.visited_menus(),
        vec![
            "home_page",
            "login_page",
            "login_form",
            "home_page",
            "account_page",
            "balance_page"
        ]
    );
    assert_eq!(
        outcome.result.as_ref().and_then(Value::as_str),
        Some("Rp 1.250.000,00")
    );

    // Overrides are persisted without any pending form data
    let saved = std::fs::read_to_string(dir.path().join("configuration.toml"))
        .expect("Configuration should be persisted");
    assert!(saved.contains("last_visit"));
    assert!(!saved.contains("123456"));
    assert!(!saved.contains("temporary"));
}

#[tokio::test]
async fn test_state_survives_between_runs() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_balance(&server).await;

    let dir = TempDir::new().unwrap();
    let portal = portal_at(&server.uri());

    let first = run_target(portal.clone(), settings(dir.path()), balance_session()).await;
    assert!(first.is_success(), "errors: {:?}", first.errors);

    // A fresh orchestrator sees the captured session state
    let orchestrator = Orchestrator::open(portal.clone(), settings(dir.path())).unwrap();
    let config = orchestrator.config();
    assert!(config.get_str(LAST_VISIT).is_some());
    let statement_url = config.get_str("menu.statement_page.url").unwrap_or_default();
    assert!(statement_url.ends_with("/app/statement?sid=s1"), "{}", statement_url);
    // Consumed one-shot URLs fall back to the defaults
    assert_eq!(
        config.get_str("menu.home_page.url"),
        Some(format!("{}/", server.uri()))
    );

    let second = run_target(portal, settings(dir.path()), balance_session()).await;
    assert!(second.is_success(), "errors: {:?}", second.errors);
    assert_eq!(second.visited_menus().len(), 6);
}

#[tokio::test]
async fn test_logout_needs_no_credentials() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_balance(&server).await;
    mount(&server, "GET", "/logout", r#"<p id="logged-out">Anda telah keluar</p>"#).await;

    let dir = TempDir::new().unwrap();
    let portal = portal_at(&server.uri());

    let first = run_target(portal.clone(), settings(dir.path()), balance_session()).await;
    assert!(first.is_success(), "errors: {:?}", first.errors);

    let outcome = run_target(portal.clone(), settings(dir.path()), Session::new("logout")).await;
    assert!(outcome.is_success(), "errors: {:?}", outcome.errors);
    assert_eq!(outcome.visited_menus(), vec!["logout_page"]);
    assert_eq!(
        outcome.result.as_ref().and_then(Value::as_str),
        Some("Logout Success")
    );

    // The next run starts a new session
    let orchestrator = Orchestrator::open(portal, settings(dir.path())).unwrap();
    assert!(orchestrator.config().get_str(LAST_VISIT).is_none());
}

const COOKIE_BUNDLE: &str = r##"
name = "cookie-bank"

[configuration.credentials]
exempt_targets = ["open", "check"]

[configuration.menu.start_page]
url = "BASE/start"
indication = { started = "note_start" }

[configuration.menu.check_page]
url = "BASE/check"
indication = { signed_in = "read_status" }

[configuration.indication.started]
selector = "#start"

[configuration.indication.signed_in]
selector = "#ok"

[configuration.target]
open = [{ type = "visit", menu = "start_page" }]
check = [{ type = "visit", menu = "check_page" }]

[handler.note_start]
action = "set"
path = "result"
value = "started"

[handler.read_status]
action = "capture_text"
selector = "#ok"
into = "result"
required = true
"##;

#[tokio::test]
async fn test_cookies_survive_between_runs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(
            html(r#"<p id="start">Halo</p>"#).insert_header("set-cookie", "SID=s3cr3t; Path=/"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/check"))
        .and(header("cookie", "SID=s3cr3t"))
        .respond_with(html(r#"<p id="ok">Sesi aktif</p>"#))
        .mount(&server)
        .await;

    let text = COOKIE_BUNDLE.replace("BASE", &server.uri());
    let portal = Arc::new(BundlePortal::parse(&text).expect("Cookie bundle should parse"));
    let dir = TempDir::new().unwrap();

    let first = run_target(portal.clone(), settings(dir.path()), Session::new("open")).await;
    assert!(first.is_success(), "errors: {:?}", first.errors);
    assert!(dir.path().join("cookies.json").exists());

    // A new orchestrator, and so a new HTTP client, still sends the cookie
    let second = run_target(portal, settings(dir.path()), Session::new("check")).await;
    assert!(second.is_success(), "errors: {:?}", second.errors);
    assert_eq!(
        second.result.as_ref().and_then(Value::as_str),
        Some("Sesi aktif")
    );
}

#[tokio::test]
async fn test_unrecognized_page_is_a_verification_error() {
    let server = MockServer::start().await;
    mount(&server, "GET", "/", "<h1>Sedang dalam pemeliharaan</h1>").await;

    let dir = TempDir::new().unwrap();
    let outcome = run_target(
        portal_at(&server.uri()),
        settings(dir.path()),
        balance_session(),
    )
    .await;

    assert_eq!(outcome.state, RunPhase::Stopped);
    assert!(outcome.result.is_none());
    assert_eq!(outcome.errors.len(), 1);
    match &outcome.errors[0] {
        CrawlError::Verification { menu, .. } => assert_eq!(menu, "home_page"),
        other => panic!("Expected a verification error, got {:?}", other),
    }
    assert!(outcome.errors[0].to_string().contains("home_page"));
}

#[tokio::test]
async fn test_rejected_login_reports_portal_message() {
    let server = MockServer::start().await;
    mount(&server, "GET", "/", r#"<a id="login" href="/auth/login">Masuk</a>"#).await;
    mount(
        &server,
        "GET",
        "/auth/login",
        r#"<form id="login" action="/auth/verify" method="post">
            <input type="text" name="user"><input type="password" name="pass">
        </form>"#,
    )
    .await;
    mount(
        &server,
        "POST",
        "/auth/verify",
        r#"<div class="error">User ID atau PIN salah</div>"#,
    )
    .await;

    let dir = TempDir::new().unwrap();
    let outcome = run_target(
        portal_at(&server.uri()),
        settings(dir.path()),
        balance_session(),
    )
    .await;

    assert_eq!(
        outcome.visited_menus(),
        vec!["home_page", "login_page", "login_form"]
    );
    match outcome.errors.as_slice() {
        [CrawlError::Domain(message)] => {
            assert_eq!(message, "Login rejected: User ID atau PIN salah")
        }
        other => panic!("Unexpected errors {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_credentials_stop_before_any_request() {
    let server = MockServer::start().await;
    mount_login(&server).await;

    let dir = TempDir::new().unwrap();
    let outcome = run_target(
        portal_at(&server.uri()),
        settings(dir.path()),
        Session::new("get_balance"),
    )
    .await;

    assert_eq!(outcome.state, RunPhase::Stopped);
    assert!(matches!(outcome.errors.as_slice(), [CrawlError::Domain(_)]));
    assert!(outcome.visited.is_empty());
    let received = server.received_requests().await.unwrap_or_default();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_transport_failure_stops_the_run() {
    let dir = TempDir::new().unwrap();
    // Nothing listens on the discard port
    let outcome = run_target(
        portal_at("http://127.0.0.1:9"),
        settings(dir.path()),
        balance_session(),
    )
    .await;

    assert_eq!(outcome.state, RunPhase::Stopped);
    assert_eq!(outcome.visited_menus(), vec!["home_page"]);
    match outcome.errors.as_slice() {
        [CrawlError::Transport { url, .. }] => assert_eq!(url, "http://127.0.0.1:9/"),
        other => panic!("Unexpected errors {:?}", other),
    }
}

#[tokio::test]
async fn test_menu_without_url_fails_the_plan() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let mut orchestrator =
        Orchestrator::open(portal_at(&server.uri()), settings(dir.path())).unwrap();

    let step = Value::try_from(Step::visit("balance_page")).unwrap();
    orchestrator
        .config_mut()
        .set("target.peek_balance", Value::Array(vec![step]));

    let mut session = balance_session();
    session.target = "peek_balance".to_string();
    let outcome = orchestrator.run(session).await;

    assert_eq!(outcome.state, RunPhase::Failed);
    assert!(matches!(outcome.errors.as_slice(), [CrawlError::Plan(_)]));
    let received = server.received_requests().await.unwrap_or_default();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_unknown_target_fails() {
    let dir = TempDir::new().unwrap();
    let mut session = balance_session();
    session.target = "get_loans".to_string();

    let outcome = run_target(portal_at("http://127.0.0.1:9"), settings(dir.path()), session).await;

    assert_eq!(outcome.state, RunPhase::Failed);
    assert!(matches!(outcome.errors.as_slice(), [CrawlError::Plan(_)]));
}

async fn mount_statement(server: &MockServer, start: &str, rows: &str) {
    Mock::given(method("POST"))
        .and(path("/app/statement/view"))
        .and(body_string_contains(start))
        .respond_with(html(&format!(
            r#"<table id="mutasi">
                <tr><th>Tanggal</th><th>Keterangan</th><th>Jumlah</th></tr>
                {}
            </table>
            <a id="back" href="/app/statement?sid=s1">Kembali</a>"#,
            rows
        )))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_get_transaction_over_three_months() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount(
        &server,
        "GET",
        "/app/statement",
        r#"<form id="statement" action="/app/statement/view" method="post">
            <select name="acct"><option value="0011">Tabungan 0011</option></select>
            <input type="text" name="start"><input type="text" name="end">
        </form>"#,
    )
    .await;

    mount_statement(
        &server,
        "start=01%2F01%2F2024",
        "<tr><td>10/01</td><td>SETORAN</td><td>100,00</td></tr>
         <tr><td>20/01</td><td>TRSF</td><td>200,00</td></tr>",
    )
    .await;
    mount_statement(
        &server,
        "start=01%2F02%2F2024",
        "<tr><td>05/02</td><td>BUNGA</td><td>1,00</td></tr>",
    )
    .await;
    mount_statement(
        &server,
        "end=20%2F03%2F2024&start=01%2F03%2F2024",
        "<tr><td>05/03</td><td>TARIK</td><td>50,00</td></tr>
         <tr><td>15/03</td><td>TRSF</td><td>75,00</td></tr>
         <tr><td>PEND</td><td>BIAYA ADM</td><td>2,50</td></tr>",
    )
    .await;

    let dir = TempDir::new().unwrap();
    let mut orchestrator = Orchestrator::open(portal_at(&server.uri()), settings(dir.path()))
        .unwrap()
        .with_today(NaiveDate::from_ymd_opt(2024, 3, 20).unwrap());

    let session = Session::new("get_transaction")
        .with_credentials("alice", "123456")
        .with_range("2024-01-15..2024-03-10");
    let outcome = orchestrator.run(session).await;

    assert!(outcome.is_success(), "errors: {:?}", outcome.errors);
    assert_eq!(
        outcome.visited_menus()[4..],
        [
            "statement_page",
            "statement_result",
            "statement_page",
            "statement_result",
            "statement_page",
            "statement_result"
        ]
    );

    // Pending rows sort as the newest; rows outside the range are dropped
    let records = outcome.result.as_ref().and_then(Value::as_array).unwrap();
    let dates: Vec<&str> = records
        .iter()
        .map(|r| r.get("date").and_then(Value::as_str).unwrap())
        .collect();
    assert_eq!(dates, vec!["", "2024-03-05", "2024-02-05", "2024-01-20"]);
    assert_eq!(
        records[1].get("description").and_then(Value::as_str),
        Some("TARIK")
    );

    // Only the missing sort order was corrected
    assert_eq!(outcome.notices.len(), 1, "{:?}", outcome.notices);
}

#[tokio::test]
async fn test_debug_capture_writes_history() {
    let server = MockServer::start().await;
    mount(&server, "GET", "/", "<h1>Sedang dalam pemeliharaan</h1>").await;

    let dir = TempDir::new().unwrap();
    run_target(
        portal_at(&server.uri()),
        settings(dir.path()).with_debug(true),
        balance_session(),
    )
    .await;

    let history = std::fs::read_to_string(dir.path().join("debug/history.log")).unwrap();
    assert_eq!(history.lines().count(), 1);
    assert!(history.contains("home_page GET"));
    let body = std::fs::read_to_string(dir.path().join("debug/response_body.html")).unwrap();
    assert!(body.contains("pemeliharaan"));
}

#[test]
fn test_overrides_file_removed_when_empty() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("configuration.toml");
    std::fs::write(&file, "referer = \"https://bank.example/\"\n").unwrap();

    let mut store = ConfigStore::open(toml::Table::new(), &file).unwrap();
    assert_eq!(store.get_str("referer").as_deref(), Some("https://bank.example/"));

    store.unset("referer");
    assert_eq!(store.persist().unwrap(), PersistOutcome::Removed);
    assert!(!file.exists());
}
