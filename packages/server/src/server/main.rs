//! Scheduler daemon entry point.

use std::future::IntoFuture;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use platform_core::collectors::{CollectorRegistry, RateLimiterRegistry};
use platform_core::ingestion::IngestionEngine;
use platform_core::metrics::SchedulerMetrics;
use platform_core::scheduler::{EventHub, PersistentScheduler, SchedulerConfig};
use platform_core::server::{build_app, AppState};
use platform_core::Config;

#[derive(Parser)]
#[command(name = "platformd", about = "Market data scheduler daemon", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler daemon and HTTP API.
    Run {
        /// Timezone used for cron trigger evaluation.
        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// Enable debug logging.
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { timezone, verbose } => match run(&timezone, verbose).await {
            Ok(code) => code,
            Err(e) => {
                // Startup failures land here; the subscriber may not be up
                // yet, so print as well as trace.
                eprintln!("fatal: {e:#}");
                tracing::error!(error = %e, "fatal initialization error");
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(timezone: &str, verbose: bool) -> Result<ExitCode> {
    let default_filter = if verbose {
        "debug,sqlx=warn,hyper=info"
    } else {
        "info,platform_core=debug,sqlx=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting market data scheduler");

    let tz: chrono_tz::Tz = timezone
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid timezone '{timezone}': {e}"))?;

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!(
        db_host = %config.db_host,
        db_name = %config.db_name,
        api_addr = %config.api_addr(),
        timezone = %tz,
        "configuration loaded"
    );

    let pool = PgPoolOptions::new()
        .max_connections((config.api_workers + config.scheduler_workers as u32).max(10))
        .connect(&config.database_url())
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;
    tracing::info!("database ready");

    let registry = Arc::new(CollectorRegistry::from_config(&config));
    let limiters = Arc::new(RateLimiterRegistry::new(
        config.rate_limit_calls,
        config.rate_limit_period,
    ));
    let metrics = Arc::new(SchedulerMetrics::new());
    let events = EventHub::new();

    let engine = Arc::new(IngestionEngine::new(
        pool.clone(),
        registry.clone(),
        limiters.clone(),
        config.default_timeout,
    ));

    let scheduler = Arc::new(PersistentScheduler::new(
        pool.clone(),
        engine,
        events.clone(),
        metrics.clone(),
        SchedulerConfig {
            worker_count: config.scheduler_workers,
            collect_timeout: config.default_timeout,
            timezone: tz,
            ..SchedulerConfig::default()
        },
    ));

    scheduler.startup().await.context("scheduler startup failed")?;

    let scheduler_handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.run().await {
                tracing::error!(error = %e, "scheduler loop exited with error");
            }
        })
    };

    let state = AppState {
        db_pool: pool.clone(),
        scheduler: scheduler.clone(),
        registry,
        metrics,
        events,
        defaults: Arc::new(config.clone()),
    };
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&config.api_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.api_addr()))?;
    tracing::info!("API listening on {}", config.api_addr());

    let shutdown = scheduler.shutdown_token();
    let server_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .into_future(),
        )
    };

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;
    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        _ = sigterm.recv() => false,
    };
    tracing::info!(interrupted, "shutdown signal received");

    // One token stops everything: the HTTP server drains and the scheduler
    // waits for in-flight workers up to its grace period.
    scheduler.begin_shutdown();
    let _ = scheduler_handle.await;
    let _ = server_handle.await;

    tracing::info!("shutdown complete");
    Ok(if interrupted {
        ExitCode::from(130)
    } else {
        ExitCode::SUCCESS
    })
}
