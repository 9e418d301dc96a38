//! bin/scheduler.rs
//!
//! C10: process entry point. Loads configuration, wires the shared state,
//! spawns the four background tasks (membership fetch, metrics scrape,
//! hot-reload, HTTP surface) and waits for SIGINT/SIGTERM to shut them down.

use std::time::Duration;

use clap::Parser;
use inference_scheduler_core::app_state::SharedState;
use inference_scheduler_core::hot_reload::{run_hot_reload_loop, HotReloadController};
use inference_scheduler_core::membership::run_membership_loop;
use inference_scheduler_core::metrics_collector::run_metrics_loop;
use inference_scheduler_core::settings::{AppConfig, DEFAULT_CONFIG_PATH};
use inference_scheduler_core::api;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "scheduler", about = "Inference request router scoring and selection core")]
struct Args {
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(&args.config)?;
    init_tracing(&config.global.log_level);

    tracing::info!(config_path = %args.config, pools = config.pools.len(), "starting scheduler");

    let state = SharedState::new(config.clone());

    // Seed the registry so the HTTP surface and metrics loop have something
    // to act on before the first membership fetch completes.
    for pool_cfg in &config.pools {
        let engine_type = inference_scheduler_core::types::EngineType::parse(&pool_cfg.engine_type)
            .unwrap_or(inference_scheduler_core::types::EngineType::Vllm);
        state.registry.upsert(inference_scheduler_core::types::Pool::new(
            inference_scheduler_core::types::PoolKey::new(pool_cfg.name.clone(), pool_cfg.partition.clone()),
            engine_type,
            Vec::new(),
        ));
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let membership_task = tokio::spawn(run_membership_loop(state.clone(), shutdown_rx.clone()));
    let metrics_task = tokio::spawn(run_metrics_loop(state.clone(), shutdown_rx.clone()));

    let hot_reload_interval = Duration::from_secs(config.global.interval.max(1));
    let hot_reload_controller = HotReloadController::new(args.config.clone());
    let hot_reload_task = tokio::spawn(run_hot_reload_loop(
        hot_reload_controller,
        state.clone(),
        hot_reload_interval,
        shutdown_rx.clone(),
    ));

    let addr: std::net::SocketAddr = format!("{}:{}", config.global.api_host, config.global.api_port).parse()?;
    let router = api::build_router(state.clone());
    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::Server::bind(&addr).serve(router.into_make_service()).await {
            tracing::error!(error = %e, "http server terminated unexpectedly");
        }
    });

    tracing::info!(addr = %addr, "http surface listening");

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping background tasks");
    let _ = shutdown_tx.send(true);

    server_task.abort();
    let _ = tokio::time::timeout(Duration::from_secs(5), membership_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), metrics_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), hot_reload_task).await;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
