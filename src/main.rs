mod api;
mod calculator;
mod config;
mod db;
mod error;
mod metrics;
mod pipeline;
mod scheduler;
mod scorer;
mod types;

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::Store;
use crate::error::Result;
use crate::metrics::SqliteMetricsRepository;
use crate::pipeline::{BatchProcessor, JobRegistry};
use crate::scheduler::AnalysisScheduler;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(&cfg.db_path)
        .create_if_missing(true);
    let pool = sqlx::SqlitePool::connect_with(connect_options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Shared state ---
    let store = Store::new(pool.clone());
    let registry = Arc::new(JobRegistry::new());
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());
    let metrics = Arc::new(SqliteMetricsRepository::new(pool.clone()));
    let processor = Arc::new(BatchProcessor::new(
        store.clone(),
        metrics,
        Arc::clone(&registry),
        Arc::clone(&latency),
        Arc::clone(&health),
        &cfg,
    ));
    info!(
        "Batch processor ready (batch_size={}, max_concurrent={}, batch_timeout={}s)",
        cfg.batch_size, cfg.max_concurrent_batches, cfg.batch_timeout_secs,
    );

    // --- Scheduled analysis (optional) ---
    if cfg.schedule_projects.is_empty() {
        info!("SCHEDULE_PROJECTS not set — jobs run on demand only. Example: SCHEDULE_PROJECTS=shop-main,shop-eu");
    } else {
        info!(
            "Scheduler active for {} project(s), every {}s: {}",
            cfg.schedule_projects.len(),
            cfg.schedule_interval_secs,
            cfg.schedule_projects.join(", "),
        );
        let scheduler =
            AnalysisScheduler::new(cfg.clone(), store.clone(), Arc::clone(&processor));
        tokio::spawn(async move { scheduler.run().await });
    }

    // --- HTTP API server ---
    let api_state = ApiState {
        store,
        processor,
        health,
        latency,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
