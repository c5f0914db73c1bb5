//! Integration tests for portal definition bundles
//!
//! These tests load the shipped example bundle and variations of it from
//! disk, the way the CLI does.

use ibank_crawler::config::{load_bundle, validate_bundle};
use ibank_crawler::crawler::{HandlerRegistry, Orchestrator, Session, StepKind};
use ibank_crawler::portal::{BundlePortal, CrawlModule, PortalRegistry};
use ibank_crawler::{ConfigError, CrawlError, RunSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn example_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("bundles/example-bank.toml")
}

fn example_text() -> String {
    std::fs::read_to_string(example_path()).expect("Example bundle should be readable")
}

/// Writes `text` as `<name>.toml` in a fresh directory
fn write_bundle(name: &str, text: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(format!("{}.toml", name));
    std::fs::write(&path, text).unwrap();
    (dir, path)
}

fn assert_invalid(text: &str, needle: &str) {
    match BundlePortal::parse(text) {
        Err(CrawlError::ConfigLoad(ConfigError::Validation(message))) => {
            assert!(message.contains(needle), "'{}' lacks '{}'", message, needle)
        }
        Err(other) => panic!("Unexpected error {:?}", other),
        Ok(portal) => panic!("Bundle '{}' should be rejected", portal.name()),
    }
}

#[test]
fn test_example_bundle_is_valid() {
    let bundle = load_bundle(&example_path()).expect("Example bundle should load");
    assert_eq!(bundle.name.as_deref(), Some("example-bank"));
    validate_bundle(&bundle.configuration).unwrap();

    let portal = BundlePortal::load(&example_path()).unwrap();
    for handler in [
        "home_public",
        "home_private",
        "login_capture",
        "login_done",
        "login_failed",
        "balance_query",
        "balance_read",
        "statement_query",
        "statement_rows",
        "statement_empty",
        "logout_done",
    ] {
        assert!(
            portal.handler_names().contains(&handler),
            "Missing handler {}",
            handler
        );
    }
}

#[test]
fn test_every_indication_reference_resolves() {
    let portal = BundlePortal::load(&example_path()).unwrap();
    let mut registry = HandlerRegistry::new();
    ibank_crawler::crawler::register_builtin_handlers(&mut registry);
    portal.register_handlers(&mut registry);

    let tree = portal.default_configuration();
    let menus = tree.get("menu").and_then(|m| m.as_table()).unwrap();
    for (menu, definition) in menus {
        let Some(indications) = definition.get("indication").and_then(|i| i.as_table()) else {
            continue;
        };
        for (indication, reference) in indications {
            let name = reference.as_str().unwrap();
            assert!(
                registry.contains(name),
                "{}.{} refers to unregistered handler {}",
                menu,
                indication,
                name
            );
        }
    }
}

#[test]
fn test_registry_names_portal_by_bundle() {
    let mut registry = PortalRegistry::new();
    let name = registry.register_bundle(&example_path()).unwrap();

    assert_eq!(name, "example-bank");
    assert!(registry.contains("example-bank"));
    assert_eq!(registry.create("example-bank").unwrap().name(), "example-bank");
}

#[test]
fn test_unnamed_bundle_takes_file_stem() {
    let text = example_text().replace("name = \"example-bank\"\n", "");
    let (_dir, path) = write_bundle("other-bank", &text);

    let mut registry = PortalRegistry::new();
    assert_eq!(registry.register_bundle(&path).unwrap(), "other-bank");

    let portal = registry.create("other-bank").unwrap();
    assert_eq!(portal.default_working_dir(), PathBuf::from(".ibank/other-bank"));
}

#[test]
fn test_malformed_bundle_file() {
    let (_dir, path) = write_bundle("broken", "name = \"broken\"\n[configuration\n");
    assert!(matches!(
        BundlePortal::load(&path),
        Err(CrawlError::ConfigLoad(ConfigError::Parse(_)))
    ));
}

#[test]
fn test_invalid_menu_url_is_rejected() {
    let text = example_text().replace(
        "url = \"https://ibank.example-bank.test/\"",
        "url = \"ftp://ibank.example-bank.test/\"",
    );
    assert_invalid(&text, "home_page");
}

#[test]
fn test_plan_with_unknown_menu_is_rejected() {
    let text = example_text().replace(
        "{ type = \"visit\", menu = \"account_page\" },",
        "{ type = \"visit\", menu = \"loan_page\" },",
    );
    assert_invalid(&text, "loan_page");
}

#[test]
fn test_action_with_unknown_reference_is_rejected() {
    let text = example_text().replace("reference = \"login\"", "reference = \"sign_in\"");
    assert_invalid(&text, "sign_in");
}

#[test]
fn test_form_capture_for_unknown_menu_is_rejected() {
    let text = example_text().replace("menu = \"balance_page\"\n", "menu = \"saldo_page\"\n");
    assert_invalid(&text, "saldo_page");
}

#[test]
fn test_window_limits_are_checked() {
    let text = example_text().replace("max_days = 31", "max_days = 0");
    match BundlePortal::parse(&text) {
        Err(CrawlError::ConfigLoad(ConfigError::Validation(_))) => {}
        other => panic!("Unexpected {:?}", other.map(|p| p.name().to_string())),
    }
}

#[test]
fn test_dry_run_plan() {
    let dir = TempDir::new().unwrap();
    let portal = Arc::new(BundlePortal::load(&example_path()).unwrap());
    let orchestrator = Orchestrator::open(portal, RunSettings::new(dir.path())).unwrap();

    let steps = orchestrator.plan(&Session::new("get_transaction")).unwrap();
    let kinds: Vec<StepKind> = steps.iter().map(|s| s.kind).collect();
    assert_eq!(kinds, vec![StepKind::Task, StepKind::Visit, StepKind::Task]);
    assert_eq!(steps[2].handler.as_deref(), Some("range_plan"));

    let logout = orchestrator.plan(&Session::new("logout")).unwrap();
    assert_eq!(logout.len(), 1);
    assert_eq!(logout[0].menu, "logout_page");

    assert!(matches!(
        orchestrator.plan(&Session::new("get_loans")),
        Err(CrawlError::Plan(_))
    ));

    // Opening does not touch the disk
    assert!(!dir.path().join("configuration.toml").exists());
}
