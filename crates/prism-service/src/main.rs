#![forbid(unsafe_code)]

//! **prism-service** – Main daemon for Prism.
//!
//! Wires the tool registry, executor, analysis engine, scheduler, and
//! webhook gateway into one process: an HTTP surface for PR-review and
//! repository-scan triggers, a dispatch loop for scheduled scans, and a
//! supervisor for hosted analyzer tools.
//!
//! ## Usage
//!
//! ```bash
//! # In-memory stores, port 8080
//! prism --storage memory
//!
//! # Durable stores and a selector configuration
//! prism --storage sqlite --db-path data/prism.db --selector-config config/selector.toml
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prism_analysis::{AnalysisConfig, AnalysisEngine};
use prism_executor::{ExecutorConfig, WorkspaceLimits};
use prism_gateway::{router, GatewayState, NullScmProvider, WebhookHandler};
use prism_registry::{ToolRegistry, ToolSupervisor};
use prism_scheduler::{DispatchConfig, Dispatcher, ScheduleManager, TickHandler};
use prism_selector::{ModelSelector, SelectorConfig};
use prism_store_core::{AnalysisCache, RepositoryStore, ScheduleStore};
use prism_store_memory::MemoryBackend;
use prism_store_sqlite::SqliteBackend;
use prism_types::AnalyzerTool;

//─────────────────────────────
//  CLI structure
//─────────────────────────────

#[derive(Parser)]
#[command(name = "prism")]
#[command(about = "Prism - automated code-review analysis orchestration")]
#[command(version)]
struct Cli {
    /// Service configuration file (TOML); environment variables override it
    #[arg(long, default_value = "config/prism.toml")]
    config: String,

    /// Selector configuration file (TOML)
    #[arg(long)]
    selector_config: Option<String>,

    /// Storage backend (memory, sqlite)
    #[arg(long, default_value = "sqlite")]
    storage: String,

    /// Database path for persistent storage
    #[arg(long, default_value = "data/prism.db")]
    db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// HTTP server port
    #[arg(long, default_value = "8080")]
    port: u16,
}

//─────────────────────────────
//  Service configuration
//─────────────────────────────

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    #[serde(default = "defaults::max_concurrency")]
    max_concurrency: usize,
    #[serde(default = "defaults::per_tool_timeout_ms")]
    per_tool_timeout_ms: u64,
    #[serde(default = "defaults::run_timeout_ms")]
    run_timeout_ms: u64,
    #[serde(default = "defaults::cache_ttl_sec")]
    cache_ttl_sec: u64,
    #[serde(default = "defaults::workspaces_dir")]
    workspaces_dir: PathBuf,
    #[serde(default = "defaults::workspace_timeout_ms")]
    workspace_timeout_ms: u64,
}

mod defaults {
    use std::path::PathBuf;

    pub fn max_concurrency() -> usize {
        10
    }
    pub fn per_tool_timeout_ms() -> u64 {
        30_000
    }
    pub fn run_timeout_ms() -> u64 {
        60_000
    }
    pub fn cache_ttl_sec() -> u64 {
        24 * 60 * 60
    }
    pub fn workspaces_dir() -> PathBuf {
        std::env::temp_dir().join("prism-workspaces")
    }
    pub fn workspace_timeout_ms() -> u64 {
        10_000
    }
}

fn load_service_config(path: &str) -> Result<ServiceConfig> {
    config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(config::Environment::default())
        .build()
        .context("failed to assemble configuration")?
        .try_deserialize()
        .context("failed to deserialize configuration")
}

fn load_selector_config(path: Option<&str>) -> Result<SelectorConfig> {
    let Some(path) = path else {
        warn!("no selector configuration given; every analysis will fail selection");
        return Ok(SelectorConfig::default());
    };
    config::Config::builder()
        .add_source(config::File::with_name(path))
        .build()
        .with_context(|| format!("failed to read selector configuration from {path}"))?
        .try_deserialize()
        .context("failed to deserialize selector configuration")
}

/// `ENABLE_<TOOLID>` feature flags; a tool is enabled unless its flag says
/// otherwise. Tool ids are uppercased with non-alphanumerics mapped to `_`.
fn tool_enabled(id: &str, env: &HashMap<String, String>) -> bool {
    let key = format!(
        "ENABLE_{}",
        id.chars()
            .map(|c| if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            })
            .collect::<String>()
    );
    env.get(&key)
        .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
        .unwrap_or(true)
}

/// Register integration-provided tools, honoring the `ENABLE_<TOOLID>` flags.
async fn register_enabled_tools(registry: &ToolRegistry, tools: Vec<Arc<dyn AnalyzerTool>>) {
    let env: HashMap<String, String> = std::env::vars().collect();
    for tool in tools {
        if tool_enabled(tool.id(), &env) {
            registry.register(tool).await;
        } else {
            info!(tool = %tool.id(), "tool disabled by feature flag");
        }
    }
}

//─────────────────────────────
//  Storage selection
//─────────────────────────────

enum Backend {
    Memory(Arc<MemoryBackend>),
    Sqlite(Arc<SqliteBackend>),
}

impl Backend {
    async fn from_cli(storage: &str, db_path: &str) -> Result<Self> {
        match storage {
            "memory" => Ok(Self::Memory(Arc::new(MemoryBackend::new()))),
            "sqlite" => {
                if let Some(parent) = std::path::Path::new(db_path).parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                Ok(Self::Sqlite(Arc::new(SqliteBackend::open(db_path).await?)))
            }
            other => anyhow::bail!("unsupported storage backend: {other}"),
        }
    }

    fn cache(&self) -> Arc<dyn AnalysisCache> {
        match self {
            Self::Memory(b) => b.clone(),
            Self::Sqlite(b) => b.clone(),
        }
    }

    fn schedules(&self) -> Arc<dyn ScheduleStore> {
        match self {
            Self::Memory(b) => b.clone(),
            Self::Sqlite(b) => b.clone(),
        }
    }

    fn repositories(&self) -> Arc<dyn RepositoryStore> {
        match self {
            Self::Memory(b) => b.clone(),
            Self::Sqlite(b) => b.clone(),
        }
    }
}

//─────────────────────────────
//  Main application
//─────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_logging(&cli.log_level);

    info!("starting Prism v{}", env!("CARGO_PKG_VERSION"));

    let service_config = load_service_config(&cli.config)?;
    let selector_config = load_selector_config(cli.selector_config.as_deref())?;

    let backend = Backend::from_cli(&cli.storage, &cli.db_path).await?;
    info!(storage = %cli.storage, "storage initialized");

    let registry = Arc::new(ToolRegistry::new());
    // Integration point: analyzer suites register their tools here, gated
    // by the ENABLE_<TOOLID> flags.
    register_enabled_tools(&registry, Vec::new()).await;

    let supervisor = Arc::new(ToolSupervisor::new());
    let supervisor_handle = supervisor.spawn_monitor();

    let executor_config = ExecutorConfig {
        max_concurrency: service_config.max_concurrency,
        tool_timeout: Duration::from_millis(service_config.per_tool_timeout_ms),
        run_timeout: Duration::from_millis(service_config.run_timeout_ms),
        workspace_timeout: Duration::from_millis(service_config.workspace_timeout_ms),
        workspaces_dir: service_config.workspaces_dir.clone(),
        workspace_limits: WorkspaceLimits::default(),
    };
    let engine = Arc::new(AnalysisEngine::new(
        registry.clone(),
        Arc::new(ModelSelector::from_config(selector_config)),
        backend.cache(),
        executor_config,
        AnalysisConfig {
            cache_ttl: Duration::from_secs(service_config.cache_ttl_sec),
        },
    ));

    let manager = Arc::new(ScheduleManager::new(backend.schedules()));
    let handler = Arc::new(WebhookHandler::new(
        engine,
        backend.repositories(),
        backend.cache(),
        manager.clone(),
        Arc::new(NullScmProvider),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        manager.clone(),
        handler.clone() as Arc<dyn TickHandler>,
        DispatchConfig::default(),
    ));
    let dispatcher_handle = dispatcher.spawn();

    let app = router(GatewayState {
        handler,
        registry,
        manager,
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", cli.port))
        .await
        .with_context(|| format!("failed to bind to port {}", cli.port))?;
    info!(port = cli.port, "HTTP server listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("shutting down");
    dispatcher.shutdown();
    supervisor.shutdown().await;
    let _ = dispatcher_handle.await;
    let _ = supervisor_handle.await;
    info!("Prism stopped");

    Ok(())
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("prism={log_level},prism_service={log_level}")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
