//! Sentinel - container health observation and self-healing
//!
//! # Usage
//!
//! ```bash
//! # Run the daemon against the local Docker engine
//! sentinel
//!
//! # Run the daemon against the built-in simulated runtime
//! sentinel --demo
//!
//! # Talk to a running daemon
//! sentinel status
//! sentinel simulate auth-service down
//! sentinel heal payments-worker --escalate
//! sentinel scale payments 5
//! sentinel activity --limit 20
//! ```
//!
//! # Environment Variables
//!
//! - `SENTINEL_CONFIG`: path to a `sentinel.toml`
//! - `SENTINEL_SERVER_ADDR`: HTTP bind address override
//! - `SENTINEL_URL`: daemon URL used by the client subcommands
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sentinel::activity::{ActivityLog, ActivityStore};
use sentinel::api;
use sentinel::client::SentinelClient;
use sentinel::config::{defaults, RuntimeBackend, SentinelConfig};
use sentinel::engine::{Engine, TriggerMode};
use sentinel::runtime::{DockerGateway, InMemoryRuntime, RuntimeGateway};
use sentinel::types::{ActivityEvent, EventPayload};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "sentinel")]
#[command(about = "Container health observation and self-healing engine")]
#[command(version)]
struct CliArgs {
    /// Path to a sentinel.toml (overrides the SENTINEL_CONFIG search)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the server address (default: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Drive the simulated in-memory runtime instead of Docker
    #[arg(long)]
    demo: bool,

    /// Daemon URL for the client subcommands
    #[arg(long, env = "SENTINEL_URL", default_value = defaults::DAEMON_URL)]
    url: String,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum FaultArg {
    Down,
    Slow,
    Healthy,
}

impl From<FaultArg> for TriggerMode {
    fn from(arg: FaultArg) -> Self {
        match arg {
            FaultArg::Down => TriggerMode::Down,
            FaultArg::Slow => TriggerMode::Slow,
            FaultArg::Healthy => TriggerMode::Healthy,
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Show every monitored unit
    Status,

    /// Force a unit's health classification for a while
    Simulate {
        unit: String,
        #[arg(value_enum)]
        mode: FaultArg,
    },

    /// Restart a unit now, bypassing the policy
    Heal {
        unit: String,
        /// Recreate instead of restart
        #[arg(long)]
        escalate: bool,
    },

    /// Set a service's replica count
    Scale { service: String, replicas: u64 },

    /// Show recent activity
    Activity {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Validate the configuration and print the effective TOML
    CheckConfig,
}

// ============================================================================
// Configuration
// ============================================================================

fn load_config(args: &CliArgs) -> Result<SentinelConfig> {
    let mut config = match &args.config {
        Some(path) => SentinelConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SentinelConfig::load(),
    };
    config.apply_env_overrides();
    if let Some(addr) = &args.addr {
        config.server.addr = addr.clone();
    }
    if args.demo {
        config.runtime.backend = RuntimeBackend::Memory;
    }
    config.validate()?;
    Ok(config)
}

// ============================================================================
// Daemon
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    Engine,
    HttpServer,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Engine => write!(f, "Engine"),
            TaskName::HttpServer => write!(f, "HttpServer"),
        }
    }
}

fn build_gateway(config: &SentinelConfig) -> Result<Arc<dyn RuntimeGateway>> {
    match config.runtime.backend {
        RuntimeBackend::Docker => {
            let gateway = DockerGateway::connect(
                &config.runtime.docker_host,
                &config.runtime.service_label,
                config.runtime.request_timeout(),
            )
            .context("Failed to connect to the Docker engine")?;
            Ok(Arc::new(gateway))
        }
        RuntimeBackend::Memory => {
            warn!("Using the simulated in-memory runtime, no real containers will be touched");
            Ok(Arc::new(InMemoryRuntime::demo()))
        }
    }
}

fn build_activity_log(config: &SentinelConfig) -> Result<ActivityLog> {
    match &config.activity.persist_path {
        Some(path) => {
            let store = ActivityStore::open(path)
                .with_context(|| format!("Failed to open activity store at {}", path.display()))?;
            info!(path = %path.display(), "Activity persisted to sled");
            Ok(ActivityLog::with_store(config.activity.capacity, store))
        }
        None => Ok(ActivityLog::new(config.activity.capacity)),
    }
}

fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Wait for shutdown or the first task failure.
async fn run_supervisor(task_set: &mut JoinSet<Result<TaskName>>, cancel_token: CancellationToken) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => break,
                }
            }
        }
    }

    while task_set.join_next().await.is_some() {}
    Ok(())
}

async fn run_daemon(config: SentinelConfig, cancel_token: CancellationToken) -> Result<()> {
    let gateway = build_gateway(&config)?;
    let activity = Arc::new(build_activity_log(&config)?);
    let engine = Arc::new(Engine::new(&config, gateway, activity));

    info!(
        backend = %config.runtime.backend,
        label = %config.runtime.monitor_label,
        restart_threshold = config.policy.restart_threshold,
        recreate_threshold = config.policy.recreate_threshold,
        "Sentinel starting"
    );

    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.addr))?;
    info!("HTTP API listening on {}", config.server.addr);

    let mut task_set = JoinSet::new();
    spawn_http_server(&mut task_set, listener, api::app_for(Arc::clone(&engine)), cancel_token.clone());

    let engine_token = cancel_token.clone();
    task_set.spawn(async move {
        engine.run(engine_token).await;
        Ok(TaskName::Engine)
    });

    run_supervisor(&mut task_set, cancel_token).await
}

// ============================================================================
// Client Subcommands
// ============================================================================

fn print_event(event: &ActivityEvent) {
    let unit = event.unit_name.as_deref().unwrap_or("-");
    let kind = match &event.payload {
        EventPayload::Transition { .. } => "transition",
        EventPayload::Outcome { .. } => "action",
        EventPayload::Notice { .. } => "notice",
    };
    println!(
        "{:>6}  {}  {:<8}  {:<10}  {:<24}  {}",
        event.seq,
        event.timestamp.format("%Y-%m-%d %H:%M:%S"),
        event.severity,
        kind,
        unit,
        event.message
    );
}

async fn run_client(client: &SentinelClient, args: &CliArgs, command: SubCommand) -> Result<()> {
    match command {
        SubCommand::Status => {
            let status = client.status().await?;
            println!(
                "backend: {}  runtime: {}  cycles: {}",
                status.backend,
                if status.runtime_reachable { "reachable" } else { "UNREACHABLE" },
                status.cycle_count
            );
            println!(
                "{:<24}  {:<12}  {:<10}  {:>6}  {:<8}  {}",
                "NAME", "ID", "HEALTH", "STREAK", "FAULT", "LAST ACTION"
            );
            for unit in &status.units {
                let (health, streak) = unit
                    .snapshot
                    .as_ref()
                    .map_or(("-".to_string(), 0), |s| (s.health_state.to_string(), s.failing_streak));
                let fault = unit.fault_override.map_or("-".to_string(), |f| f.mode.to_string());
                let last = unit.last_outcome.as_ref().map_or("-".to_string(), |o| {
                    format!("{} {}", o.action, if o.success { "ok" } else { "failed" })
                });
                println!(
                    "{:<24}  {:<12}  {:<10}  {:>6}  {:<8}  {}",
                    unit.unit.name, unit.unit.display_id, health, streak, fault, last
                );
            }
        }
        SubCommand::Simulate { unit, mode } => {
            let result = client.trigger(&unit, mode.into(), false).await?;
            match result.fault_override {
                Some(fault) => println!("{} forced {} until {}", result.unit.name, fault.mode, fault.expires_at),
                None => println!("{}: {}", result.unit.name, result.mode),
            }
        }
        SubCommand::Heal { unit, escalate } => {
            let result = client.trigger(&unit, TriggerMode::Heal, escalate).await?;
            if let Some(outcome) = result.outcome {
                println!("{} {}: {}", outcome.action, result.unit.name, outcome.status);
                if let Some(id) = outcome.new_unit_id {
                    println!("  new id: {id}");
                }
                if let Some(err) = outcome.error {
                    println!("  error: {}", err.message);
                }
                if let Some(cleanup) = outcome.cleanup_error {
                    println!("  cleanup: {cleanup}");
                }
            }
        }
        SubCommand::Scale { service, replicas } => {
            let outcome = client.scale(&service, replicas).await?;
            match outcome.error {
                None => println!("{service}: {} replicas", outcome.replicas.unwrap_or(replicas)),
                Some(err) if err.retryable => println!("{service}: {} (retryable)", err.message),
                Some(err) => println!("{service}: {}", err.message),
            }
        }
        SubCommand::Activity { limit } => {
            for event in client.activity(limit).await? {
                print_event(&event);
            }
        }
        SubCommand::CheckConfig => {
            let config = load_config(args)?;
            print!("{}", config.to_toml()?);
        }
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut args = CliArgs::parse();

    match args.command.take() {
        Some(command) => {
            let client = SentinelClient::new(&args.url, Duration::from_secs(defaults::CLIENT_TIMEOUT_SECS))?;
            run_client(&client, &args, command)
                .await
                .with_context(|| format!("Request to {} failed", client.base_url()))
        }
        None => {
            let config = load_config(&args)?;

            let cancel_token = CancellationToken::new();
            let shutdown_token = cancel_token.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Received Ctrl+C, shutting down");
                shutdown_token.cancel();
            });

            run_daemon(config, cancel_token).await
        }
    }
}
