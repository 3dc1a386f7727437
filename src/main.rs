#![forbid(unsafe_code)]

//! `relay-control` — controller binary.
//!
//! Bootstraps configuration, connects the store, reconciles plan
//! counters, and starts the scheduler, registry scans, pipeline,
//! sync dispatcher, approval poller, retention purge, and the local
//! ops endpoint.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use relay_control::api::{facade::AdminApi, http as ops_http};
use relay_control::config::GlobalConfig;
use relay_control::dispatcher;
use relay_control::persistence::{db, retention};
use relay_control::pipeline::{PipelineContext, PipelineRouter};
use relay_control::platform::http::HttpClientProvider;
use relay_control::quota::QuotaManager;
use relay_control::registry::{self, WorkerRegistry};
use relay_control::scheduler::{self, Scheduler};
use relay_control::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "relay-control", about = "Message-forwarding control plane", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the ops HTTP port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("relay-control bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    let config = Arc::new(config);
    info!("configuration loaded");

    // ── Initialize store ────────────────────────────────
    let db_path = config.db_path.to_string_lossy().to_string();
    let db = Arc::new(db::connect(&db_path).await?);
    info!("database connected");

    // ── Quota plane + startup reconciliation ────────────
    let quota = Arc::new(QuotaManager::new(&db, &config));
    quota.reconcile_counters().await?;
    info!("plan counters reconciled");

    // ── Registry, scheduler, pipeline, dispatcher ───────
    let cancel = CancellationToken::new();
    let (registry_tx, registry_rx) = mpsc::channel(64);
    let registry = Arc::new(WorkerRegistry::new(&db, registry_tx.clone()));

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&db),
        Arc::clone(&config),
        Arc::clone(&quota),
    ));

    let provider = Arc::new(HttpClientProvider::new(config.platform_timeout()));
    let (sync_tx, sync_rx) = mpsc::channel(1024);
    let pipeline_ctx = Arc::new(PipelineContext::new(
        &db,
        Arc::clone(&config),
        provider,
        sync_tx,
    ));
    let router = Arc::new(PipelineRouter::new(
        Arc::clone(&pipeline_ctx),
        cancel.child_token(),
    ));

    let mut tasks = Vec::new();
    tasks.push(registry::spawn_liveness_scan(
        Arc::clone(&db),
        Arc::clone(&config),
        registry_tx,
        cancel.child_token(),
    ));
    tasks.push(scheduler::spawn_registry_event_loop(
        Arc::clone(&scheduler),
        registry_rx,
        cancel.child_token(),
    ));
    tasks.push(dispatcher::spawn_sync_dispatcher(
        Arc::clone(&pipeline_ctx),
        sync_rx,
        cancel.child_token(),
    ));
    tasks.push(dispatcher::spawn_approval_poller(
        Arc::clone(&pipeline_ctx),
        cancel.child_token(),
    ));
    tasks.push(relay_control::pipeline::starter::spawn_session_starter(
        Arc::clone(&pipeline_ctx),
        Arc::clone(&scheduler),
        cancel.child_token(),
    ));
    tasks.push(retention::spawn_retention_task(
        Arc::clone(&db),
        config.retention.clone(),
        cancel.child_token(),
    ));
    info!("background tasks started");

    // ── Admin facade + ops endpoint ─────────────────────
    let api = Arc::new(AdminApi::new(
        Arc::clone(&db),
        Arc::clone(&config),
        Arc::clone(&quota),
        Arc::clone(&scheduler),
        Arc::clone(&registry),
        Arc::clone(&router),
        Arc::clone(&pipeline_ctx),
    ));

    let ops_cancel = cancel.child_token();
    let ops_api = Arc::clone(&api);
    let ops_port = config.http_port;
    let ops_task = tokio::spawn(async move {
        if let Err(err) = ops_http::serve(ops_api, ops_port, ops_cancel).await {
            error!(%err, "ops endpoint exited");
        }
    });

    info!("relay-control running");

    // ── Shutdown ────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .map_err(|err| AppError::Internal(format!("signal listener failed: {err}")))?;
    info!("shutdown requested");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    let _ = ops_task.await;
    info!("relay-control stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|err| AppError::Config(format!("tracing init failed: {err}")))
}
