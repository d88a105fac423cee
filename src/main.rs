//! reqctx, the request context engine host
//!
//! Serves HTTP requests, giving each one a private request context,
//! bracketing it with lifecycle hooks, carrying flash values into the next
//! request on the same session, and tracking login sessions.
//!
//! Usage:
//!   reqctx                                      # Default port 7080, in-memory sessions
//!   reqctx --port 8080                          # Custom port
//!   reqctx --config reqctx.jsonc                # Engine config file (JSON with comments)
//!   reqctx --sessions-file ~/.reqctx/sessions.json --activity-log ~/.reqctx/activity.jsonl

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use reqctx_server::{ContextEngine, EngineConfig};
use reqctx_services::{
    ActivityLog, JsonFileSessionStorage, JsonlActivityLog, MemoryActivityLog,
    MemorySessionStorage, SessionMonitor, SessionStorage, SessionStoreRegistry,
};
use reqctx_transport::{TransportConfig, TransportServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "reqctx", about = "Request context engine host")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "7080")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Engine config file (JSON, comments allowed)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path prefix the application is mounted under (overrides the config file)
    #[arg(long)]
    context_path: Option<String>,

    /// Persist the session list to this file
    #[arg(long)]
    sessions_file: Option<PathBuf>,

    /// Append activity records to this JSONL file
    #[arg(long)]
    activity_log: Option<PathBuf>,

    /// Enable permissive CORS
    #[arg(long)]
    cors: bool,

    /// Drop session stores idle for this many seconds (0 keeps them forever)
    #[arg(long, default_value = "1800")]
    session_idle_secs: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file (defaults to ~/.reqctx/logs/reqctx.log if no path given)
    #[arg(long, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if let Ok(env) = std::env::var("RUST_LOG") {
        EnvFilter::new(env)
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    if let Some(ref log_file_arg) = cli.log_file {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        let log_path = if log_file_arg == "DEFAULT" {
            PathBuf::from(&home).join(".reqctx/logs/reqctx.log")
        } else {
            PathBuf::from(log_file_arg)
        };

        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open log file {}", log_path.display()))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn load_engine_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("invalid config file {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(ref context_path) = cli.context_path {
        config.context_path = context_path.trim_end_matches('/').to_string();
    }
    Ok(config)
}

fn build_monitor(cli: &Cli, config: &EngineConfig) -> SessionMonitor {
    let storage: Arc<dyn SessionStorage> = match &cli.sessions_file {
        Some(path) => Arc::new(JsonFileSessionStorage::new(path.clone())),
        None => Arc::new(MemorySessionStorage::new()),
    };
    let log: Arc<dyn ActivityLog> = match &cli.activity_log {
        Some(path) => Arc::new(JsonlActivityLog::new(path.clone())),
        None => Arc::new(MemoryActivityLog::new()),
    };
    SessionMonitor::new(storage, log).with_retention(config.retention.clone())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }

    let engine_config = match load_engine_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    };

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                        reqctx host                           ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("  Port:          {}", cli.port);
    println!("  Binding:       {}", cli.hostname);
    println!(
        "  Context path:  {}",
        if engine_config.context_path.is_empty() { "/" } else { &engine_config.context_path }
    );
    match &cli.sessions_file {
        Some(path) => println!("  Sessions:      {}", path.display()),
        None => println!("  Sessions:      in memory"),
    }
    match &cli.activity_log {
        Some(path) => println!("  Activity log:  {}", path.display()),
        None => println!("  Activity log:  in memory"),
    }
    println!();

    let monitor = build_monitor(&cli, &engine_config);
    let engine = Arc::new(ContextEngine::new(engine_config, monitor));
    engine.start();

    let stores = Arc::new(SessionStoreRegistry::new());

    let transport_config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname.clone(),
        enable_cors: cli.cors,
        verbose_logging: cli.verbose,
        session_idle_secs: (cli.session_idle_secs > 0).then_some(cli.session_idle_secs),
    };

    let mut transport = match TransportServer::start(transport_config, engine.clone(), stores).await {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to start transport: {e}");
            std::process::exit(1);
        }
    };

    println!("  Server running on http://{}:{}", cli.hostname, transport.port());
    println!("  Press Ctrl+C to stop.");
    println!();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {e}");
    }

    info!("Shutting down");
    transport.stop().await;
    engine.shutdown();
    println!("  Server stopped.");
}
