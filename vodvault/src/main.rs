use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use vodvault::config::AppConfig;
use vodvault::database::{self, repositories::SqlxJobRepository};
use vodvault::jobs::{JobClient, JobRuntime};
use vodvault::notification::{LogNotifier, Notifier, WebhookConfig, WebhookNotifier};
use vodvault::platform::YtDlpPlatformClient;
use vodvault::tasks::{self, TaskContext, TaskSettings};
use vodvault::toolchain::CliToolchain;
use vodvault::{logging, panic_hook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let _log_guard = logging::init_logging(&config.log_dir)?;
    panic_hook::install();

    let shutdown = CancellationToken::new();
    logging::start_retention_cleanup(config.log_dir.clone(), shutdown.clone());

    // Initialize database
    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let notifier: Arc<dyn Notifier> = match &config.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(WebhookConfig {
            bearer_token: config.webhook_token.clone(),
            ..WebhookConfig::new(url.clone())
        })?),
        None => Arc::new(LogNotifier),
    };

    let client = JobClient::new(Arc::new(SqlxJobRepository::new(pool.clone())));
    let ctx = Arc::new(TaskContext::new(
        pool.clone(),
        client.clone(),
        Arc::new(YtDlpPlatformClient::new(
            config.tools.yt_dlp.clone(),
            config.live.platform_base_url.clone(),
        )),
        Arc::new(CliToolchain::new(&config, http)),
        notifier,
        TaskSettings::from_config(&config),
    ));

    let runtime = tasks::register(JobRuntime::builder(client), ctx.clone())
        .workers(config.workers)
        .poll_interval(config.timings.poll_interval)
        .start()
        .await?;
    tasks::ensure_watchdog(&ctx).await?;
    tasks::start_watchdog_supervisor(ctx.clone(), shutdown.clone());

    tracing::info!("vodvault started");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    shutdown.cancel();
    runtime.shutdown().await;
    pool.close().await;

    tracing::info!("vodvault stopped");
    Ok(())
}
