// src/main.rs
// drift - multi-agent orchestration runtime

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use drift::collaborator::SubprocessCollaborator;
use drift::config::DriftConfig;
use drift::host::{UnifiedToolHost, rpc};
use drift::memory::MemoryStore;
use drift::orchestrator::{ObjectiveOptions, Orchestrator, PatternStore};
use drift::scheduler::render::visualize_plan;
use drift::session::SessionManager;
use drift::session::render::{RenderOptions, render_tree};
use drift::telemetry::Telemetry;

#[derive(Parser)]
#[command(name = "drift", version, about = "Multi-agent orchestration runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the unified tool host on stdio (and optionally HTTP)
    Serve {
        /// Also expose the HTTP surface on this address (host:port)
        #[arg(long)]
        http: Option<String>,
    },
    /// Plan and execute an objective end to end
    Objective {
        /// The natural-language objective
        text: String,
        /// Collaborator command answering task prompts on stdio
        #[arg(long, env = "DRIFT_COLLABORATOR")]
        collaborator: String,
        /// Only print the plan, do not execute
        #[arg(long)]
        plan_only: bool,
        #[arg(long, default_value = "default")]
        project: String,
        #[arg(long, default_value = "default")]
        session: String,
    },
    /// Tool catalog operations
    Tools {
        #[command(subcommand)]
        command: ToolsCommands,
    },
    /// Session tree operations
    Sessions {
        #[command(subcommand)]
        command: SessionsCommands,
    },
    /// Fleet operations
    Fleet {
        #[command(subcommand)]
        command: FleetCommands,
    },
}

#[derive(Subcommand)]
enum ToolsCommands {
    /// Search the tool index
    Search { query: String },
    /// Show availability buckets for a session
    Status {
        #[arg(long)]
        session: Option<String>,
    },
}

#[derive(Subcommand)]
enum SessionsCommands {
    /// Render the fork tree for a project
    Tree {
        #[arg(long, default_value = "default")]
        project: String,
        #[arg(long)]
        current: Option<String>,
    },
}

#[derive(Subcommand)]
enum FleetCommands {
    /// Show per-server connection status
    Status,
    /// Re-read config and start newly added servers
    Reload,
    /// Restart one server from fresh config
    Restart { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("DRIFT_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = DriftConfig::from_env();

    match cli.command {
        Commands::Serve { http } => serve(config, http).await,
        Commands::Objective {
            text,
            collaborator,
            plan_only,
            project,
            session,
        } => run_objective(config, text, collaborator, plan_only, project, session).await,
        Commands::Tools { command } => tools_command(config, command).await,
        Commands::Sessions { command } => sessions_command(config, command).await,
        Commands::Fleet { command } => fleet_command(config, command).await,
    }
}

async fn serve(config: DriftConfig, http: Option<String>) -> Result<()> {
    let telemetry = Telemetry::new(
        &config.telemetry.endpoint,
        &config.state.root,
        config.telemetry.disabled,
    );
    telemetry.ping("startup");

    let host = UnifiedToolHost::initialize(config.host_config()).await?;

    if let Some(addr) = http {
        let http_host = host.clone();
        tokio::spawn(async move {
            if let Err(err) = rpc::serve_http(http_host, &addr).await {
                warn!("[Main] HTTP surface stopped: {}", err);
            }
        });
    }

    let stdio_host = host.clone();
    let served = tokio::spawn(async move { rpc::serve_stdio(stdio_host).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("[Main] Interrupt received");
        }
        result = served => {
            if let Err(err) = result? {
                warn!("[Main] Stdio surface stopped: {}", err);
            }
        }
    }

    telemetry.ping("shutdown");
    host.shutdown().await;
    Ok(())
}

async fn run_objective(
    config: DriftConfig,
    text: String,
    collaborator: String,
    plan_only: bool,
    project: String,
    session: String,
) -> Result<()> {
    use drift::orchestrator::{build_objective_plan, classify_objective, estimate_complexity};

    let objective_type = classify_objective(&text);
    let complexity = estimate_complexity(&text);
    let plan = build_objective_plan(&text, objective_type, complexity)?;
    println!("{}", visualize_plan(&plan));

    if plan_only {
        return Ok(());
    }

    let telemetry = Telemetry::new(
        &config.telemetry.endpoint,
        &config.state.root,
        config.telemetry.disabled,
    );
    let memory = MemoryStore::new(&config.state.root);
    if !memory.exists(&project, &session).await {
        memory.create(&project, &session, &text).await?;
    }

    let orchestrator = Orchestrator::new(
        Arc::new(SubprocessCollaborator::new(collaborator, Vec::new())),
        memory.clone(),
        PatternStore::new(&config.state.root),
        drift::bus::EventBus::new(),
    );

    let options = ObjectiveOptions {
        project_id: project,
        session_id: session,
        ..Default::default()
    };
    let result = orchestrator.execute_objective(&text, &options).await?;
    println!(
        "{}",
        drift::scheduler::render::summarize_result(&result.plan_result)
    );
    telemetry.ping("objective_completed");
    memory.flush_all().await?;

    if result.plan_result.success {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

async fn tools_command(config: DriftConfig, command: ToolsCommands) -> Result<()> {
    let host = UnifiedToolHost::initialize(config.host_config()).await?;

    match command {
        ToolsCommands::Search { query } => {
            for hit in host.index().search(&query, 20) {
                println!(
                    "{:>4}  {:<40} [{}] {}",
                    hit.score,
                    hit.entry.id,
                    hit.entry.category,
                    if hit.entry.deferred { "deferred" } else { "available" }
                );
            }
        }
        ToolsCommands::Status { session } => {
            let enabled = match &session {
                Some(session) => host.enablement().get_enabled_tools(session).await,
                None => Default::default(),
            };
            let report = host.index().get_tool_status(&enabled);
            println!("available: {}", report.available.join(", "));
            println!("enabled:   {}", report.enabled.join(", "));
            println!("deferred:  {}", report.deferred.len());
        }
    }

    host.shutdown().await;
    Ok(())
}

async fn sessions_command(config: DriftConfig, command: SessionsCommands) -> Result<()> {
    match command {
        SessionsCommands::Tree { project, current } => {
            let memory = MemoryStore::new(&config.state.root);
            let sessions = SessionManager::new(memory);
            let tree = sessions
                .build_session_tree(&project, current.as_deref())
                .await?;
            print!("{}", render_tree(&tree, RenderOptions::full()));
        }
    }
    Ok(())
}

async fn fleet_command(config: DriftConfig, command: FleetCommands) -> Result<()> {
    let host = UnifiedToolHost::initialize(config.host_config()).await?;
    let fleet = host.fleet();

    match command {
        FleetCommands::Status => {
            for status in fleet.status().await {
                println!(
                    "{:<20} {:?} (attempts: {}, tools: {}){}",
                    status.name,
                    status.status,
                    status.attempts,
                    status.tool_count,
                    status
                        .last_error
                        .map(|err| format!(" last error: {err}"))
                        .unwrap_or_default()
                );
            }
        }
        FleetCommands::Reload => {
            let added = fleet.reload().await?;
            println!("added: {added:?}");
        }
        FleetCommands::Restart { name } => {
            fleet.restart(&name).await?;
            println!("restarted '{name}'");
        }
    }

    host.shutdown().await;
    Ok(())
}
