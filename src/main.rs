// ABOUTME: CLI entry point for the PlanetScale to Supabase migrator
// ABOUTME: Parses flags, sets up logging and signal-driven cancellation, runs the orchestrator

use anyhow::Context;
use clap::Parser;
use planetscale_supabase_migrator::prompt::{Prompter, TerminalPrompter, TerminalState};
use planetscale_supabase_migrator::signals::ScopedSignals;
use planetscale_supabase_migrator::{Orchestrator, Settings};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "planetscale-supabase-migrator")]
#[command(about = "Migrate a PlanetScale (MySQL) database to Supabase (PostgreSQL) with pgloader")]
#[command(version)]
struct Cli {
    /// Path to a TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL of the website relaying the Supabase OAuth redirect
    #[arg(long, env = "MIGRATOR_WEBSITE_URL")]
    website_url: Option<String>,

    /// Sign in to Supabase and pick a project instead of pasting a connection URI
    #[arg(long)]
    login: bool,

    /// Log verbosity: trace, debug, info, warn, error (RUST_LOG overrides)
    #[arg(long, default_value = "info")]
    verbosity: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.verbosity);
    let terminal = TerminalState::capture();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let cancel = match watch_signals() {
        Ok(cancel) => cancel,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    println!();
    println!(" Migrate from PlanetScale to Supabase ");
    println!();

    let prompter: Arc<dyn Prompter> = Arc::new(TerminalPrompter);
    let orchestrator = Orchestrator::new(settings, prompter, cancel, cli.login);

    let outcome = orchestrator.run().await;
    terminal.restore();

    match outcome {
        Ok(report) => {
            println!("Migration complete! 🎉🎉🎉");
            if let Some(url) = report.dashboard_url {
                println!("Check your new database at {}", url);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            // Prompt threads may still be blocked on the terminal.
            std::process::exit(i32::from(e.exit_code()));
        }
    }
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    Ok(settings.with_website_url(cli.website_url.clone()))
}

fn init_logging(verbosity: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("planetscale_supabase_migrator={}", verbosity)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Run-wide cancellation: the first interrupt/terminate/quit cancels the token,
/// which kills any child process and closes any callback listener.
fn watch_signals() -> anyhow::Result<CancellationToken> {
    let cancel = CancellationToken::new();
    let mut signals = ScopedSignals::install().context("Failed to install signal handlers")?;
    let token = cancel.clone();
    tokio::spawn(async move {
        let name = signals.recv().await;
        eprintln!("\nReceived {}. Stopping...", name);
        token.cancel();
    });
    Ok(cancel)
}
