//! Hive CLI - headless AI-agent orchestration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use hive::bus::ProcessRole;
use hive::client::{AuthStatus, ClientConfig};
use hive::error::FixSuggestion;
use hive::workflow::WorkflowSpec;
use hive::{HiveError, Orchestrator};

#[derive(Parser)]
#[command(name = "hive")]
#[command(about = "Hive - headless orchestration for AI coding-assistant CLIs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow spec against a provider, streaming events as JSON
    Run {
        /// Path to a workflow spec file (YAML)
        file: String,

        /// Provider to spawn (claude, amp, codex, gemini, opencode)
        #[arg(short, long, default_value = "claude")]
        provider: String,

        /// Override the provider's default model
        #[arg(short, long)]
        model: Option<String>,

        /// Resume an existing provider session
        #[arg(short, long)]
        session: Option<String>,

        /// Inline MCP config JSON to inject into the provider
        #[arg(long)]
        mcp_config: Option<String>,

        /// Kill the process after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Working directory for the session (defaults to cwd)
        #[arg(short, long)]
        work_dir: Option<PathBuf>,

        /// Skip provider permission prompts where supported
        #[arg(long)]
        yolo: bool,
    },

    /// List registered providers
    Providers,

    /// Check auth and executables for every registered provider
    Doctor,
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            file,
            provider,
            model,
            session,
            mcp_config,
            timeout,
            work_dir,
            yolo,
        } => {
            run_workflow(
                &file, &provider, model, session, mcp_config, timeout, work_dir, yolo,
            )
            .await
        }
        Commands::Providers => list_providers(),
        Commands::Doctor => doctor(),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_workflow(
    file: &str,
    provider: &str,
    model: Option<String>,
    session: Option<String>,
    mcp_config: Option<String>,
    timeout: Option<u64>,
    work_dir: Option<PathBuf>,
    yolo: bool,
) -> Result<(), HiveError> {
    let yaml = tokio::fs::read_to_string(file).await?;
    let spec: WorkflowSpec = serde_yaml::from_str(&yaml)?;

    let orchestrator = Orchestrator::with_builtin_clients();
    orchestrator.install_lifecycle_sync();

    let workflow = orchestrator.create_workflow(&spec)?;
    println!(
        "{} workflow {} ({}) via {}",
        "→".cyan(),
        workflow.name.cyan().bold(),
        workflow.id,
        provider.cyan()
    );

    // Print every enriched envelope as one JSON line.
    let subscription_token = CancellationToken::new();
    let mut envelopes = orchestrator.bus().subscribe(subscription_token.clone());
    let printer = tokio::spawn(async move {
        while let Some(envelope) = envelopes.recv().await {
            match serde_json::to_string(&envelope) {
                Ok(line) => println!("{line}"),
                Err(err) => tracing::debug!(error = %err, "unserializable envelope"),
            }
        }
    });

    let mut config = ClientConfig::new(spec.initial_prompt.clone(), resolve_work_dir(work_dir)?);
    if let Some(model) = model {
        config = config.with_model(model);
    }
    if let Some(session) = session {
        config = config.with_session(session);
    }
    if let Some(mcp) = mcp_config {
        config = config.with_mcp_config(mcp);
    }
    if let Some(secs) = timeout {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    if yolo {
        config = config.skip_permissions();
    }

    let mut process = orchestrator
        .launch(workflow.id, provider, &config, ProcessRole::Coordinator)
        .await?;
    process.wait().await;

    // Give the forwarders a moment to flush, then shut the stream down.
    tokio::task::yield_now().await;
    subscription_token.cancel();
    let _ = printer.await;
    orchestrator.bus().close();

    let status = process.status();
    let state = orchestrator.workflows().get(workflow.id)?.state;
    println!(
        "{} process {} | workflow {}",
        "✓".green(),
        status.to_string().bold(),
        state.to_string().bold()
    );
    Ok(())
}

fn resolve_work_dir(work_dir: Option<PathBuf>) -> Result<PathBuf, HiveError> {
    match work_dir {
        Some(dir) => Ok(dir),
        None => Ok(std::env::current_dir()?),
    }
}

fn list_providers() -> Result<(), HiveError> {
    let orchestrator = Orchestrator::with_builtin_clients();
    println!("{}", "Registered providers:".cyan().bold());
    for name in orchestrator.clients().names() {
        println!("  {name}");
    }
    Ok(())
}

fn doctor() -> Result<(), HiveError> {
    let orchestrator = Orchestrator::with_builtin_clients();
    let mut healthy = 0usize;
    let names = orchestrator.clients().names();

    for name in &names {
        let client = orchestrator
            .clients()
            .create(name)
            .expect("names() only returns registered providers");

        let auth = match client.check_auth() {
            AuthStatus::Ok => "auth ok".green(),
            AuthStatus::NoAuth => "no auth".red(),
        };
        let executable = match client.find_executable() {
            Ok(path) => path.display().to_string().green(),
            Err(e) => {
                let mut message = "not found".red().to_string();
                if let Some(hint) = e.fix_suggestion() {
                    message.push_str(&format!(" ({hint})"));
                }
                message.normal()
            }
        };
        let responsive = if client.is_available() {
            healthy += 1;
            "responds".green()
        } else {
            "no response".yellow()
        };

        println!("{} {auth} | {executable} | {responsive}", name.bold());
    }

    println!(
        "\n{} {}/{} providers ready",
        "→".cyan(),
        healthy,
        names.len()
    );
    Ok(())
}
