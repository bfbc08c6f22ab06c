use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use agentsync::SyncConfig;
use agentsync::agents::{Registry, default_agents};
use agentsync::project::{HttpProjectClient, ProjectSyncManager, SimulatedExecutor};

#[derive(Parser)]
#[command(name = "agentsync")]
#[command(version, about = "Match tracker tasks to agents and keep the tracker in sync")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Debug logging for agentsync (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sync loop until Ctrl-C
    Run {
        /// TOML config file
        #[arg(short, long, env = "AGENTSYNC_CONFIG")]
        config: Option<PathBuf>,

        /// Start without the built-in agents
        #[arg(long)]
        no_defaults: bool,
    },

    /// Validate configuration and print the effective values
    CheckConfig {
        #[arg(short, long, env = "AGENTSYNC_CONFIG")]
        config: Option<PathBuf>,
    },

    /// List the built-in agents
    Agents {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run {
            config,
            no_defaults,
        } => run(config, no_defaults).await,
        Command::CheckConfig { config } => check_config(config),
        Command::Agents { json } => list_agents(json),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "agentsync=debug"
    } else {
        "agentsync=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let json = std::env::var("AGENTSYNC_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let (text_layer, json_layer) = if json {
        (None, Some(fmt::layer().json()))
    } else {
        (Some(fmt::layer().with_target(false)), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .init();
}

async fn run(config_path: Option<PathBuf>, no_defaults: bool) -> anyhow::Result<()> {
    let config = SyncConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    let registry = Arc::new(Registry::new());
    if !no_defaults {
        let agents = registry.register_defaults().await;
        tracing::info!(count = agents.len(), "Registered default agents");
    }

    if !config.is_active() {
        tracing::warn!("Project sync is disabled, set AGENTSYNC_ENABLED=true to run");
        return Ok(());
    }

    let client =
        Arc::new(HttpProjectClient::from_config(&config).context("Failed to create tracker client")?);
    let manager = ProjectSyncManager::new(
        config,
        client,
        Arc::clone(&registry),
        Arc::new(SimulatedExecutor::new()),
    );

    manager.start().await.context("Failed to start project sync")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");

    manager.stop().await?;

    let stats = registry.stats().await;
    let assignments = manager.assignments().await;
    tracing::info!(
        agents = stats.total_agents,
        assignments = assignments.len(),
        "Exiting"
    );
    Ok(())
}

fn check_config(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = SyncConfig::load(config_path.as_deref()).context("Invalid configuration")?;
    println!("{:#?}", config);
    if let Some(url) = config.webhook.callback_url() {
        println!("webhook callback: {}", url);
    }
    println!("active: {}", config.is_active());
    Ok(())
}

fn list_agents(json: bool) -> anyhow::Result<()> {
    let agents = default_agents();
    if json {
        println!("{}", serde_json::to_string_pretty(&agents)?);
        return Ok(());
    }
    for agent in agents {
        println!(
            "{:<12} {:<11} {}",
            agent.name,
            agent.agent_type.as_str(),
            agent.capabilities.join(", ")
        );
    }
    Ok(())
}
