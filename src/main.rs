//! ibank-crawl main entry point
//!
//! This is the command-line interface for the ibank-crawler engine.

use anyhow::{bail, Context};
use clap::Parser;
use ibank_crawler::crawler::{Orchestrator, Session};
use ibank_crawler::output::{
    format_plan, format_result, generate_markdown_summary, print_summary, RunSummary,
};
use ibank_crawler::portal::{CrawlModule, PortalRegistry};
use ibank_crawler::RunSettings;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// ibank-crawl: runs a target against an internet-banking portal
///
/// Portals are defined by bundle files. The result is printed on stdout;
/// notices and errors go to stderr.
#[derive(Parser, Debug)]
#[command(name = "ibank-crawl")]
#[command(version)]
#[command(about = "Stateful crawler for internet-banking portals", long_about = None)]
struct Cli {
    /// Portal name, as registered by a bundle
    #[arg(value_name = "PORTAL")]
    portal: String,

    /// Target to run, e.g. get_balance
    #[arg(value_name = "TARGET")]
    target: String,

    /// Portal definition bundle (repeatable)
    #[arg(short, long = "bundle", value_name = "FILE")]
    bundles: Vec<PathBuf>,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    password: Option<String>,

    #[arg(long)]
    account: Option<String>,

    /// Date range: today, yesterday, YYYY-MM-DD or YYYY-MM-DD..YYYY-MM-DD
    #[arg(long)]
    range: Option<String>,

    /// Sort order of records: asc or desc
    #[arg(long)]
    sort: Option<String>,

    /// Any other session input (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    inputs: Vec<(String, String)>,

    /// Working directory for persisted state (default: .ibank/<portal>)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// File name of the persisted overrides inside the working directory
    #[arg(long, value_name = "NAME")]
    config_file: Option<String>,

    /// Seconds to pause between steps (0 to 2)
    #[arg(long)]
    delay: Option<f64>,

    /// Capture every exchange under <cwd>/debug
    #[arg(long)]
    debug: bool,

    /// Validate the portal and print the plan without crawling
    #[arg(long)]
    dry_run: bool,

    /// Write a markdown summary of the run
    #[arg(long, value_name = "FILE")]
    summary: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let mut registry = PortalRegistry::new();
    for path in &cli.bundles {
        let name = registry
            .register_bundle(path)
            .with_context(|| format!("Failed to load bundle {}", path.display()))?;
        tracing::info!("Loaded portal '{}' from {}", name, path.display());
    }
    if registry.names().is_empty() {
        bail!("No portal registered, pass at least one --bundle");
    }

    let module = registry.create(&cli.portal)?;
    let session = build_session(module.as_ref(), &cli);
    let settings = build_settings(module.as_ref(), &cli);

    if cli.dry_run {
        handle_dry_run(module, settings, &session)?;
        return Ok(ExitCode::SUCCESS);
    }

    handle_run(module, settings, session, cli.summary.as_deref()).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ibank_crawler=info,warn"),
            1 => EnvFilter::new("ibank_crawler=debug,info"),
            2 => EnvFilter::new("ibank_crawler=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn parse_key_value(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", input)),
    }
}

fn build_session(module: &dyn CrawlModule, cli: &Cli) -> Session {
    let mut session = Session::new(cli.target.clone());
    let named = [
        ("username", &cli.username),
        ("password", &cli.password),
        ("account", &cli.account),
        ("range", &cli.range),
        ("sort", &cli.sort),
    ];
    for (key, value) in named {
        if let Some(value) = value {
            module.set(&mut session, key, value);
        }
    }
    for (key, value) in &cli.inputs {
        module.set(&mut session, key, value);
    }
    session
}

fn build_settings(module: &dyn CrawlModule, cli: &Cli) -> RunSettings {
    let working_dir = cli
        .cwd
        .clone()
        .unwrap_or_else(|| module.default_working_dir());
    let mut settings = RunSettings::new(working_dir).with_debug(cli.debug);
    if let Some(name) = &cli.config_file {
        settings.configuration_file = name.clone();
    }
    if let Some(delay) = cli.delay {
        settings = settings.with_delay(delay);
    }
    settings
}

/// Handles the --dry-run mode: loads state and shows the plan
fn handle_dry_run(
    module: Arc<dyn CrawlModule>,
    settings: RunSettings,
    session: &Session,
) -> anyhow::Result<()> {
    println!("=== {} dry run ===\n", module.name());
    println!(
        "Configuration: {}",
        settings.configuration_path().display()
    );
    println!("Pacing delay: {:.2}s\n", settings.pacing_delay().as_secs_f64());

    let orchestrator = Orchestrator::open(Arc::clone(&module), settings)?;
    let steps = orchestrator.plan(session)?;
    module.prepare(session, orchestrator.config())?;

    println!("Target '{}':", session.target);
    print!("{}", format_plan(&steps));
    println!("\n✓ Portal definition is valid");

    Ok(())
}

/// Handles the main crawl operation
async fn handle_run(
    module: Arc<dyn CrawlModule>,
    settings: RunSettings,
    session: Session,
    summary_path: Option<&std::path::Path>,
) -> anyhow::Result<ExitCode> {
    let portal = module.name().to_string();
    let mut orchestrator = Orchestrator::open(module, settings)?;
    let outcome = orchestrator.run(session).await;

    if let Some(result) = &outcome.result {
        print!("{}", format_result(result)?);
    }

    let summary = RunSummary::from_outcome(portal, &outcome);
    print_summary(&summary);

    if let Some(path) = summary_path {
        generate_markdown_summary(&summary, path)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
        tracing::info!("Summary written to {}", path.display());
    }

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
